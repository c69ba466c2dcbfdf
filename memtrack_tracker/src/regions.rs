//! Region-level view over the interval tree.
//!
//! [`RegionsTree`] couples the interval tree with the call-stack storage and
//! translates region operations into single tree mutations with the right
//! metadata discipline:
//!
//! | Operation | Tag | Call site |
//! |-----------|-----|-----------|
//! | reserve | caller's | caller's |
//! | commit | inherited from the reservation | caller's |
//! | uncommit | inherited from the reservation | empty |
//! | release | none | empty |
//! | set_tag | caller's | untouched |
//!
//! It also offers coalescing walks that reassemble whole reserved regions
//! and committed sub-regions from the stored inflection points, which is
//! what report generation consumes.

use memtrack_core::stack::{CallStackStorage, NativeStack, StackIndex};
use memtrack_core::tag::MemTag;
use memtrack_core::vmatree::{StateType, SummaryDiff, VMATree};
use memtrack_core::Position;

/// A maximal reserved (or partly committed) run with one tag. The call site
/// is the reservation's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRegion {
    /// First byte of the region.
    pub base: Position,
    /// Region width in bytes.
    pub size: usize,
    /// Memory category of the whole region.
    pub tag: MemTag,
    /// Call site of the reservation.
    pub stack_idx: StackIndex,
}

impl ReservedRegion {
    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> Position {
        self.base + self.size
    }

    /// Whether `addr` falls inside the region.
    #[inline]
    pub fn contains(&self, addr: Position) -> bool {
        self.base <= addr && addr < self.end()
    }
}

/// A maximal committed run. The call site is the one that committed the
/// run's first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedRegion {
    /// First byte of the run.
    pub base: Position,
    /// Run width in bytes.
    pub size: usize,
    /// Call site of the commit.
    pub stack_idx: StackIndex,
}

/// The interval tree plus the call-stack storage feeding it.
pub struct RegionsTree {
    tree: VMATree,
    storage: CallStackStorage,
}

impl RegionsTree {
    /// Create an empty region store. `detailed` selects whether call stacks
    /// are kept or collapsed to the sentinel.
    pub fn new(detailed: bool) -> Self {
        Self {
            tree: VMATree::new(),
            storage: CallStackStorage::new(detailed),
        }
    }

    /// Whether call stacks are being stored.
    pub fn is_detailed(&self) -> bool {
        self.storage.is_detailed()
    }

    /// The underlying interval tree.
    pub fn tree(&self) -> &VMATree {
        &self.tree
    }

    /// Resolve a call-site handle. Returns the empty stack in summary mode.
    pub fn stack(&self, idx: StackIndex) -> &NativeStack {
        self.storage.get(idx)
    }

    /// Record a reservation of `[addr, addr + size)`.
    pub fn reserve(
        &mut self,
        addr: Position,
        size: usize,
        stack: &NativeStack,
        tag: MemTag,
    ) -> Option<SummaryDiff> {
        let idx = self.storage.push(stack);
        self.tree
            .reserve_mapping(addr, size, memtrack_core::RegionData::new(idx, tag))
    }

    /// Record a commit of `[addr, addr + size)`. The tag comes from the
    /// enclosing reservation.
    pub fn commit(
        &mut self,
        addr: Position,
        size: usize,
        stack: &NativeStack,
    ) -> Option<SummaryDiff> {
        let idx = self.storage.push(stack);
        self.tree
            .commit_mapping(addr, size, memtrack_core::RegionData::new(idx, MemTag::NONE))
    }

    /// Record an uncommit of `[addr, addr + size)`: back to reserved with
    /// the enclosing tag.
    pub fn uncommit(&mut self, addr: Position, size: usize) -> Option<SummaryDiff> {
        self.tree
            .uncommit_mapping(addr, size, memtrack_core::RegionData::EMPTY)
    }

    /// Record a release of `[addr, addr + size)`.
    pub fn release(&mut self, addr: Position, size: usize) -> Option<SummaryDiff> {
        self.tree.release_mapping(addr, size)
    }

    /// Rewrite the tag of the mapped bytes in `[addr, addr + size)`.
    pub fn set_tag(&mut self, addr: Position, size: usize, tag: MemTag) -> Option<SummaryDiff> {
        self.tree.set_tag(addr, size, tag)
    }

    /// Walk every reserved region in address order, coalescing committed and
    /// reserved sub-runs that share a tag. The visitor returns `false` to
    /// stop.
    pub fn visit_reserved_regions<F>(&self, mut f: F)
    where
        F: FnMut(&ReservedRegion) -> bool,
    {
        let mut current: Option<ReservedRegion> = None;
        let mut stopped = false;
        self.tree.visit_intervals(|iv| {
            if iv.state.state() == StateType::Released {
                if let Some(region) = current.take() {
                    if !f(&region) {
                        stopped = true;
                        return false;
                    }
                }
                return true;
            }
            match current.as_mut() {
                // Intervals are contiguous, so same tag means same region.
                Some(region) if region.tag == iv.state.tag() => {
                    region.size += iv.size();
                }
                _ => {
                    if let Some(region) = current.take() {
                        if !f(&region) {
                            stopped = true;
                            return false;
                        }
                    }
                    current = Some(ReservedRegion {
                        base: iv.base,
                        size: iv.size(),
                        tag: iv.state.tag(),
                        stack_idx: iv.state.stack(),
                    });
                }
            }
            true
        });
        if !stopped {
            if let Some(region) = current {
                f(&region);
            }
        }
    }

    /// Walk the committed runs intersecting `[start, start + size)` in
    /// address order. The visitor returns `false` to stop.
    pub fn visit_committed_regions<F>(&self, start: Position, size: usize, mut f: F)
    where
        F: FnMut(&CommittedRegion) -> bool,
    {
        let window_end = start.saturating_add(size);
        let mut current: Option<CommittedRegion> = None;
        let mut stopped = false;
        self.tree.visit_intervals(|iv| {
            if iv.base >= window_end {
                return false;
            }
            let base = iv.base.max(start);
            let end = iv.end.min(window_end);
            if end <= base || !iv.state.state().covers_committed() {
                if let Some(region) = current.take() {
                    if !f(&region) {
                        stopped = true;
                        return false;
                    }
                }
                return true;
            }
            match current.as_mut() {
                Some(region) if region.base + region.size == base => {
                    region.size += end - base;
                }
                _ => {
                    if let Some(region) = current.take() {
                        if !f(&region) {
                            stopped = true;
                            return false;
                        }
                    }
                    current = Some(CommittedRegion {
                        base,
                        size: end - base,
                        stack_idx: iv.state.stack(),
                    });
                }
            }
            true
        });
        if !stopped {
            if let Some(region) = current {
                f(&region);
            }
        }
    }

    /// The reserved region containing `addr`, if any.
    pub fn find_reserved_region(&self, addr: Position) -> Option<ReservedRegion> {
        let mut found = None;
        self.visit_reserved_regions(|region| {
            if region.contains(addr) {
                found = Some(*region);
                return false;
            }
            // Regions arrive in ascending order; past the probe nothing can
            // match anymore.
            region.base <= addr
        });
        found
    }
}
