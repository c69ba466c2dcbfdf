//! The process-facing recording facade.
//!
//! One [`Tracker`] instance serializes every mutation behind a single mutex,
//! forwards it to the region store and folds the resulting per-tag delta
//! into live counters. Readers either copy the counters ([`Tracker::snapshot`])
//! or walk the interval map under the lock ([`Tracker::walk`]).
//!
//! Recording operations never fail toward the caller. An update the tree
//! cannot apply is dropped and counted; a counter that would go negative is
//! clamped to zero and the tracker marks itself degraded. Both conditions
//! surface through [`Tracker::status`].

use std::sync::OnceLock;

use parking_lot::Mutex;

use memtrack_core::stack::NativeStack;
use memtrack_core::tag::{MemTag, TagNameTable};
use memtrack_core::vmatree::{StateType, SummaryDiff};
use memtrack_core::Position;

use crate::config::TrackerConfig;
use crate::regions::RegionsTree;

/// Live totals for one tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagUsage {
    /// Reserved bytes, committed bytes included.
    pub reserved: u64,
    /// Committed bytes.
    pub committed: u64,
}

/// A point-in-time copy of the per-tag counters, consistent with the tree at
/// the moment it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tags: Box<[TagUsage; MemTag::MAX_TAGS]>,
}

impl Snapshot {
    /// Usage recorded for `tag`.
    #[inline]
    pub fn of(&self, tag: MemTag) -> TagUsage {
        self.tags[tag.index()]
    }

    /// Tags with non-zero usage, in tag order.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (MemTag, TagUsage)> + '_ {
        self.tags
            .iter()
            .enumerate()
            .filter(|(_, usage)| usage.reserved != 0 || usage.committed != 0)
            .map(|(index, usage)| {
                let tag = MemTag::from_index(index).unwrap_or(MemTag::NONE);
                (tag, *usage)
            })
    }

    /// Usage summed over every tag.
    pub fn total(&self) -> TagUsage {
        let mut total = TagUsage::default();
        for usage in self.tags.iter() {
            total.reserved += usage.reserved;
            total.committed += usage.committed;
        }
        total
    }
}

/// Health and mode flags, the tracker's status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStatus {
    /// Whether call stacks are stored.
    pub detailed: bool,
    /// Updates dropped because the tree could not allocate.
    pub dropped: u64,
    /// Whether accounting had to be clamped at some point.
    pub degraded: bool,
}

/// One uniform interval handed to [`Tracker::walk`] visitors. The call
/// stack is copied out so the visitor borrows nothing from the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedInterval {
    /// First byte.
    pub base: Position,
    /// One past the last byte.
    pub end: Position,
    /// Mapping state of the interval.
    pub state: StateType,
    /// Memory category.
    pub tag: MemTag,
    /// Call site attributed to the interval.
    pub stack: NativeStack,
}

impl TrackedInterval {
    /// Interval width in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.base
    }
}

/// Everything the lock guards.
struct TrackerState {
    regions: RegionsTree,
    names: TagNameTable,
    counters: Box<[TagUsage; MemTag::MAX_TAGS]>,
    dropped: u64,
    degraded: bool,
}

impl TrackerState {
    fn new(detailed: bool) -> Self {
        Self {
            regions: RegionsTree::new(detailed),
            names: TagNameTable::new(),
            counters: Box::new([TagUsage::default(); MemTag::MAX_TAGS]),
            dropped: 0,
            degraded: false,
        }
    }

    /// Fold one operation's outcome into the counters. `None` means the
    /// tree dropped the update.
    fn fold(&mut self, diff: Option<SummaryDiff>) {
        let Some(diff) = diff else {
            self.dropped += 1;
            log::warn!("tracking update dropped, {} so far", self.dropped);
            return;
        };
        for (tag, single) in diff.iter_nonzero() {
            let usage = &mut self.counters[tag.index()];
            usage.reserved = clamped_add(usage.reserved, single.reserve, &mut self.degraded);
            usage.committed = clamped_add(usage.committed, single.commit, &mut self.degraded);
        }
    }

    /// Cross-check counters and tree structure after a mutation.
    fn verify(&mut self) {
        if !self.regions.tree().check_invariants() {
            self.mark_degraded();
            return;
        }
        if self.degraded {
            // Clamped counters no longer match walk totals; nothing left to
            // compare.
            return;
        }
        let walked = self.regions.tree().summary_from_walk();
        let mut drifted = false;
        for (index, usage) in self.counters.iter().enumerate() {
            let tag = MemTag::from_index(index).unwrap_or(MemTag::NONE);
            let total = walked.of(tag);
            if usage.reserved != total.reserve as u64 || usage.committed != total.commit as u64 {
                debug_assert!(
                    false,
                    "counter drift for tag {}: folded {:?}, walked {:?}",
                    index, usage, total
                );
                drifted = true;
                break;
            }
        }
        if drifted {
            self.mark_degraded();
        }
    }

    fn mark_degraded(&mut self) {
        if !self.degraded {
            log::warn!("memory tracking degraded; totals are now approximate");
        }
        self.degraded = true;
    }
}

/// Add a signed delta to a counter, clamping at zero. An excursion below
/// zero means the recorded operation stream was inconsistent; accounting
/// continues with approximate totals.
fn clamped_add(current: u64, delta: i64, degraded: &mut bool) -> u64 {
    let next = current as i64 + delta;
    if next < 0 {
        debug_assert!(false, "summary counter underflow");
        if !*degraded {
            log::warn!("memory tracking degraded; totals are now approximate");
        }
        *degraded = true;
        0
    } else {
        next as u64
    }
}

/// The native memory tracker facade.
pub struct Tracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl Tracker {
    /// Create a tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Self {
        let state = TrackerState::new(config.detailed);
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// The configuration the tracker was created with.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record a reservation of `[addr, addr + size)` attributed to `tag`
    /// and the given call site.
    pub fn reserve(&self, addr: Position, size: usize, stack: &NativeStack, tag: MemTag) {
        self.mutate(|state| state.regions.reserve(addr, size, stack, tag));
    }

    /// Record a commit of `[addr, addr + size)`. The charge goes to the
    /// enclosing reservation's tag.
    pub fn commit(&self, addr: Position, size: usize, stack: &NativeStack) {
        self.mutate(|state| state.regions.commit(addr, size, stack));
    }

    /// Record an uncommit of `[addr, addr + size)`.
    pub fn uncommit(&self, addr: Position, size: usize) {
        self.mutate(|state| state.regions.uncommit(addr, size));
    }

    /// Record a release of `[addr, addr + size)`.
    pub fn release(&self, addr: Position, size: usize) {
        self.mutate(|state| state.regions.release(addr, size));
    }

    /// Recategorize the mapped bytes of `[addr, addr + size)` under `tag`.
    pub fn set_tag(&self, addr: Position, size: usize, tag: MemTag) {
        self.mutate(|state| state.regions.set_tag(addr, size, tag));
    }

    /// Resolve `name` to a tag, registering it on first use.
    pub fn tag_named(&self, name: &str) -> MemTag {
        self.state.lock().names.make_tag(name)
    }

    /// The name registered for `tag`.
    pub fn name_of(&self, tag: MemTag) -> String {
        self.state.lock().names.name_of(tag).to_string()
    }

    /// Copy the per-tag counters.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            tags: state.counters.clone(),
        }
    }

    /// The tracker's health and mode flags.
    pub fn status(&self) -> TrackerStatus {
        let state = self.state.lock();
        TrackerStatus {
            detailed: state.regions.is_detailed(),
            dropped: state.dropped,
            degraded: state.degraded,
        }
    }

    /// Walk every tracked interval in address order under the lock. The
    /// visitor returns `false` to stop; it must not re-enter the tracker or
    /// perform I/O.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&TrackedInterval) -> bool,
    {
        let state = self.state.lock();
        state.regions.tree().visit_intervals(|iv| {
            f(&TrackedInterval {
                base: iv.base,
                end: iv.end,
                state: iv.state.state(),
                tag: iv.state.tag(),
                stack: *state.regions.stack(iv.state.stack()),
            })
        });
    }

    /// Number of inflection points currently stored. Exposed for tests and
    /// diagnostics.
    pub fn node_count(&self) -> usize {
        self.state.lock().regions.tree().node_count()
    }

    fn mutate<F>(&self, op: F)
    where
        F: FnOnce(&mut TrackerState) -> Option<SummaryDiff>,
    {
        let mut state = self.state.lock();
        let diff = op(&mut state);
        state.fold(diff);
        if self.config.verify_invariants {
            state.verify();
        }
    }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static TRACKER: OnceLock<Tracker> = OnceLock::new();

/// Initialize the process-wide tracker. The first call wins; later calls
/// return the existing instance and their configuration is ignored.
pub fn init(config: TrackerConfig) -> &'static Tracker {
    TRACKER.get_or_init(|| Tracker::new(config))
}

/// The process-wide tracker, initialized with defaults when [`init`] was
/// never called.
pub fn tracker() -> &'static Tracker {
    TRACKER.get_or_init(|| Tracker::new(TrackerConfig::default()))
}

/// The process-wide tracker, if it was initialized.
pub fn instance() -> Option<&'static Tracker> {
    TRACKER.get()
}
