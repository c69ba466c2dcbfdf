//! Interval map over the process's virtual address space.
//!
//! The tree stores a sequence of points where the mapping state changes:
//! from released to reserved memory, from reserved to committed, or between
//! two differently-attributed regions. Everything between two consecutive
//! points is one uniform interval, so the tree is the minimum set of
//! inflection points describing the whole address space. Outside the
//! outermost points everything is released.
//!
//! Node invariants, maintained by every mutation:
//!
//! - keys strictly increase and each node's outgoing state equals the next
//!   node's incoming state,
//! - the leftmost incoming and rightmost outgoing states are released,
//! - no node records a no-op change,
//! - released intervals carry only sentinel metadata.
//!
//! The sole mutating operation is [`VMATree::register_mapping`], which
//! rewrites the state of an arbitrary `[a, b)` range, renormalizes the
//! affected nodes (at most the two endpoints plus the nodes the range
//! swallows) and returns the signed per-tag change in reserved and committed
//! bytes.

mod state;
mod summary;

pub use state::{IntervalChange, IntervalState, RegionData, StateType};
pub use summary::{SingleDiff, SummaryDiff};

use smallvec::SmallVec;

use crate::tag::MemTag;
use crate::treap::Treap;
use crate::Position;

/// A node's key and change, copied out for accounting while the tree is
/// being reshaped.
#[derive(Debug, Clone, Copy)]
struct AddressState {
    address: Position,
    change: IntervalChange,
}

impl AddressState {
    #[inline]
    fn in_state(&self) -> IntervalState {
        self.change.in_state
    }

    #[inline]
    fn out_state(&self) -> IntervalState {
        self.change.out_state
    }
}

/// What the splice at an endpoint has to do to the node there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeAction {
    Nothing,
    Insert,
    Overwrite,
    Remove,
}

/// One uniform interval produced by [`VMATree::visit_intervals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedInterval {
    /// First byte of the interval.
    pub base: Position,
    /// One past the last byte.
    pub end: Position,
    /// State and metadata of every byte in `[base, end)`.
    pub state: IntervalState,
}

impl MappedInterval {
    /// Interval width in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.base
    }
}

/// Interval tree over the address space with online summary accounting.
pub struct VMATree {
    tree: Treap<IntervalChange>,
}

impl VMATree {
    /// Create an empty tree: every byte released.
    pub fn new() -> Self {
        Self { tree: Treap::new() }
    }

    /// Number of inflection points currently stored.
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    /// Whether the whole address space is released.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Set `[a, b)` to `state` with `metadata`, leaving every other byte
    /// unchanged, and return the per-tag delta this caused.
    ///
    /// With `use_tag_inplace` the range inherits the tag of the interval
    /// covering `a` instead of the tag in `metadata`, so commits and
    /// uncommits charge the category of the enclosing reservation.
    ///
    /// Returns `None` when a needed node could not be allocated; the tree is
    /// unchanged in that case and the caller should drop the update.
    pub fn register_mapping(
        &mut self,
        a: Position,
        b: Position,
        state: StateType,
        metadata: RegionData,
        use_tag_inplace: bool,
    ) -> Option<SummaryDiff> {
        debug_assert!(a <= b, "inverted range");
        if a >= b {
            return Some(SummaryDiff::new());
        }
        debug_assert!(
            !use_tag_inplace || metadata.tag.is_none(),
            "in-place tag updates ignore the supplied tag"
        );

        let target = IntervalState::new(state, metadata);
        let mut st_a = IntervalChange {
            in_state: IntervalState::RELEASED,
            out_state: target,
        };
        let mut st_b = IntervalChange {
            in_state: target,
            out_state: IntervalState::RELEASED,
        };

        // Splice at A: consult the interval that covered it so far.
        let leq_a = self.tree.closest_leq(a).map(|node| AddressState {
            address: node.key(),
            change: *node.value(),
        });

        let a_action;
        match &leq_a {
            None => {
                // With nothing at or before A there is no tag to inherit;
                // the supplied metadata stands.
                a_action = if st_a.is_noop() {
                    NodeAction::Nothing
                } else {
                    NodeAction::Insert
                };
            }
            Some(leq) => {
                if use_tag_inplace && leq.out_state().state() != StateType::Released {
                    let tag = leq.out_state().tag();
                    st_a.out_state.set_tag(tag);
                    st_b.in_state.set_tag(tag);
                }
                // Unless the sweep finds a closer node, B keeps flowing into
                // whatever covered A before.
                st_b.out_state = leq.out_state();

                if leq.address == a {
                    st_a.in_state = leq.in_state();
                    a_action = if st_a.is_noop() {
                        NodeAction::Remove
                    } else {
                        NodeAction::Overwrite
                    };
                } else {
                    st_a.in_state = leq.out_state();
                    a_action = if st_a.is_noop() {
                        NodeAction::Nothing
                    } else {
                        NodeAction::Insert
                    };
                }
            }
        }

        // Sweep (a, b): every node strictly inside the range is swallowed.
        // The last one seen determines what B flows into.
        let mut to_delete: SmallVec<[AddressState; 8]> = SmallVec::new();
        self.tree.visit_range_in_order(a + 1, b, |node| {
            st_b.out_state = node.value().out_state;
            to_delete.push(AddressState {
                address: node.key(),
                change: *node.value(),
            });
            true
        });

        // Splice at B: repurpose an existing node, or plan a fresh one.
        let b_action = match self.tree.find(b) {
            Some(node) => {
                st_b.out_state = node.value().out_state;
                if st_b.is_noop() {
                    to_delete.push(AddressState {
                        address: b,
                        change: *node.value(),
                    });
                    NodeAction::Nothing
                } else {
                    NodeAction::Overwrite
                }
            }
            None => {
                if st_b.is_noop() {
                    NodeAction::Nothing
                } else {
                    NodeAction::Insert
                }
            }
        };

        // Mutate. Fallible inserts go first so an allocation failure can
        // still back out, leaving the tree exactly as it was.
        let insert_a = a_action == NodeAction::Insert;
        if insert_a && !self.tree.upsert(a, st_a) {
            return None;
        }
        if b_action == NodeAction::Insert && !self.tree.upsert(b, st_b) {
            if insert_a {
                self.tree.remove(a);
            }
            return None;
        }
        if a_action == NodeAction::Overwrite {
            if let Some(change) = self.tree.find_mut(a) {
                *change = st_a;
            }
        }
        if b_action == NodeAction::Overwrite {
            if let Some(change) = self.tree.find_mut(b) {
                *change = st_b;
            }
        }
        if a_action == NodeAction::Remove {
            self.tree.remove(a);
        }
        for doomed in &to_delete {
            self.tree.remove(doomed.address);
        }

        // Summary accounting from the pre-mutation copies.
        let mut diff = SummaryDiff::new();

        if to_delete.is_empty() {
            if let Some(leq) = &leq_a {
                // The range punched a hole in (or exactly replaced a piece
                // of) the interval that covered it.
                account(&mut diff, &leq.out_state(), b - a, -1);
            }
        }

        let mut prev = AddressState {
            address: a,
            change: st_a,
        };
        for doomed in &to_delete {
            account(&mut diff, &doomed.in_state(), doomed.address - prev.address, -1);
            prev = *doomed;
        }
        if prev.address != a && prev.address < b {
            // The stretch from the last swallowed node up to B was covered
            // by that node's outgoing interval.
            account(&mut diff, &prev.out_state(), b - prev.address, -1);
        }

        // And the range itself, at its new state. The tag comes from the
        // spliced state so in-place inheritance is charged correctly.
        account(&mut diff, &st_a.out_state, b - a, 1);

        Some(diff)
    }

    /// Rewrite the tag of every mapped byte in `[from, from + size)`,
    /// leaving states and call-site handles untouched. Crosses as many
    /// enclosing ranges as the span covers; released gaps are skipped.
    pub fn set_tag(&mut self, from: Position, size: usize, tag: MemTag) -> Option<SummaryDiff> {
        let end = from.saturating_add(size);
        let mut diff = SummaryDiff::new();
        let mut pos = from;
        while pos < end {
            let range = self.tree.find_enclosing_range(pos);
            let (Some(start), Some(stop)) = (range.start, range.end) else {
                debug_assert!(false, "tag rewrite outside any mapped range");
                break;
            };
            let covering = start.value().out_state;
            let segment_end = end.min(stop.key());
            if covering.state() == StateType::Released {
                pos = segment_end;
                continue;
            }
            let data = RegionData::new(covering.stack(), tag);
            let state = covering.state();
            let step = self.register_mapping(pos, segment_end, state, data, false)?;
            diff.apply(&step);
            pos = segment_end;
        }
        Some(diff)
    }

    /// Record `[from, from + size)` as reserved with `metadata`.
    pub fn reserve_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
    ) -> Option<SummaryDiff> {
        self.register_mapping(from, from + size, StateType::Reserved, metadata, false)
    }

    /// Record `[from, from + size)` as committed. The tag is inherited from
    /// the enclosing reservation; `metadata` carries the committing call
    /// site.
    pub fn commit_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
    ) -> Option<SummaryDiff> {
        self.register_mapping(from, from + size, StateType::Committed, metadata, true)
    }

    /// Record `[from, from + size)` as uncommitted: back to reserved,
    /// keeping the enclosing tag, adopting the (empty) uncommit call site.
    pub fn uncommit_mapping(
        &mut self,
        from: Position,
        size: usize,
        metadata: RegionData,
    ) -> Option<SummaryDiff> {
        self.register_mapping(from, from + size, StateType::Reserved, metadata, true)
    }

    /// Record `[from, from + size)` as released.
    pub fn release_mapping(&mut self, from: Position, size: usize) -> Option<SummaryDiff> {
        self.register_mapping(from, from + size, StateType::Released, RegionData::EMPTY, false)
    }

    /// Visit every inflection point in key order. The visitor returns
    /// `false` to stop.
    pub fn visit_in_order<F>(&self, mut f: F)
    where
        F: FnMut(Position, &IntervalChange) -> bool,
    {
        self.tree.visit_in_order(|node| f(node.key(), node.value()));
    }

    /// Visit inflection points with `from <= key < to` in key order.
    pub fn visit_range_in_order<F>(&self, from: Position, to: Position, mut f: F)
    where
        F: FnMut(Position, &IntervalChange) -> bool,
    {
        self.tree
            .visit_range_in_order(from, to, |node| f(node.key(), node.value()));
    }

    /// The inflection points sandwiching `pos`: the greatest at or below it
    /// and the smallest above it.
    pub fn find_enclosing_range(
        &self,
        pos: Position,
    ) -> (Option<(Position, IntervalChange)>, Option<(Position, IntervalChange)>) {
        let range = self.tree.find_enclosing_range(pos);
        (
            range.start.map(|n| (n.key(), *n.value())),
            range.end.map(|n| (n.key(), *n.value())),
        )
    }

    /// Visit every uniform interval between inflection points, including
    /// released gaps inside the mapped span. The visitor returns `false` to
    /// stop.
    pub fn visit_intervals<F>(&self, mut f: F)
    where
        F: FnMut(&MappedInterval) -> bool,
    {
        let mut prev: Option<AddressState> = None;
        self.tree.visit_in_order(|node| {
            let keep_going = match prev {
                None => true,
                Some(p) => f(&MappedInterval {
                    base: p.address,
                    end: node.key(),
                    state: p.out_state(),
                }),
            };
            prev = Some(AddressState {
                address: node.key(),
                change: *node.value(),
            });
            keep_going
        });
    }

    /// Recompute per-tag totals from a fresh walk. Reporting uses folded
    /// diffs instead; this exists for consistency checking.
    pub fn summary_from_walk(&self) -> SummaryDiff {
        let mut totals = SummaryDiff::new();
        self.visit_intervals(|interval| {
            account(&mut totals, &interval.state, interval.size(), 1);
            true
        });
        totals
    }

    /// Check the structural invariants. Returns false, logging the first
    /// violation, when the tree is inconsistent.
    pub fn check_invariants(&self) -> bool {
        let mut ok = true;
        let mut prev: Option<AddressState> = None;
        let mut first = true;
        self.tree.visit_in_order(|node| {
            let change = node.value();
            if first {
                first = false;
                if change.in_state != IntervalState::RELEASED {
                    log::error!("leftmost node at {:#x} has a non-released incoming state", node.key());
                    ok = false;
                }
            }
            if change.is_noop() {
                log::error!("no-op node at {:#x}", node.key());
                ok = false;
            }
            for side in [change.in_state, change.out_state] {
                if side.state() == StateType::Released && side.region_data() != RegionData::EMPTY {
                    log::error!("released interval at {:#x} carries metadata", node.key());
                    ok = false;
                }
            }
            if let Some(p) = prev {
                if p.out_state() != change.in_state {
                    log::error!(
                        "state mismatch between {:#x} and {:#x}",
                        p.address,
                        node.key()
                    );
                    ok = false;
                }
            }
            prev = Some(AddressState {
                address: node.key(),
                change: *change,
            });
            true
        });
        if let Some(last) = prev {
            if last.out_state() != IntervalState::RELEASED {
                log::error!(
                    "rightmost node at {:#x} has a non-released outgoing state",
                    last.address
                );
                ok = false;
            }
        }
        ok
    }
}

impl Default for VMATree {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold one interval's worth of bytes into the diff, signed.
fn account(diff: &mut SummaryDiff, st: &IntervalState, len: usize, sign: i64) {
    if !st.state().covers_reserved() {
        return;
    }
    let delta = sign * len as i64;
    let single = diff.of_mut(st.tag());
    single.reserve += delta;
    if st.state().covers_committed() {
        single.commit += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackIndex;

    const S1: StackIndex = StackIndex::EMPTY;

    fn rd(tag: MemTag) -> RegionData {
        RegionData::new(S1, tag)
    }

    fn keys(tree: &VMATree) -> Vec<Position> {
        let mut out = Vec::new();
        tree.visit_in_order(|key, _| {
            out.push(key);
            true
        });
        out
    }

    fn intervals(tree: &VMATree) -> Vec<(Position, Position, StateType, MemTag)> {
        let mut out = Vec::new();
        tree.visit_intervals(|iv| {
            out.push((iv.base, iv.end, iv.state.state(), iv.state.tag()));
            true
        });
        out
    }

    fn reserve(tree: &mut VMATree, from: Position, size: usize, tag: MemTag) -> SummaryDiff {
        tree.reserve_mapping(from, size, rd(tag)).expect("no alloc failure")
    }

    fn commit(tree: &mut VMATree, from: Position, size: usize) -> SummaryDiff {
        tree.commit_mapping(from, size, rd(MemTag::NONE)).expect("no alloc failure")
    }

    fn uncommit(tree: &mut VMATree, from: Position, size: usize) -> SummaryDiff {
        tree.uncommit_mapping(from, size, rd(MemTag::NONE)).expect("no alloc failure")
    }

    fn release(tree: &mut VMATree, from: Position, size: usize) -> SummaryDiff {
        tree.release_mapping(from, size).expect("no alloc failure")
    }

    #[test]
    fn test_empty_range_is_noop() {
        let mut tree = VMATree::new();
        let diff = tree
            .register_mapping(100, 100, StateType::Reserved, rd(MemTag::GC), false)
            .unwrap();
        assert!(diff.is_zero());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_release_of_untracked_memory_is_noop() {
        let mut tree = VMATree::new();
        let diff = release(&mut tree, 0, 1000);
        assert!(diff.is_zero());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_single_reservation() {
        let mut tree = VMATree::new();
        let diff = reserve(&mut tree, 0, 100, MemTag::GC);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 100, commit: 0 });
        assert_eq!(keys(&tree), vec![0, 100]);
        assert_eq!(intervals(&tree), vec![(0, 100, StateType::Reserved, MemTag::GC)]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_adjacent_reservations_merge() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = reserve(&mut tree, 100, 100, MemTag::GC);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 100, commit: 0 });
        assert_eq!(keys(&tree), vec![0, 200]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_adjacent_reservations_with_different_tags_do_not_merge() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        reserve(&mut tree, 100, 100, MemTag::CODE);
        assert_eq!(keys(&tree), vec![0, 100, 200]);
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 100, StateType::Reserved, MemTag::GC),
                (100, 200, StateType::Reserved, MemTag::CODE),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_reserve_then_full_release_empties_the_tree() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = release(&mut tree, 0, 100);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: -100, commit: 0 });
        assert!(tree.is_empty());
    }

    #[test]
    fn test_identical_reservation_twice_is_neutral() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = reserve(&mut tree, 0, 100, MemTag::GC);
        assert!(diff.is_zero());
        assert_eq!(keys(&tree), vec![0, 100]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_partial_commit_inside_reservation() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = commit(&mut tree, 0, 50);
        // Committed bytes stay reserved, so the reserve total is unchanged.
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: 50 });
        assert_eq!(keys(&tree), vec![0, 50, 100]);
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 50, StateType::Committed, MemTag::GC),
                (50, 100, StateType::Reserved, MemTag::GC),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_commit_inherits_reservation_tag() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = commit(&mut tree, 20, 30);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: 30 });
        assert!(diff.of(MemTag::NONE).commit == 0);
        let ivs = intervals(&tree);
        assert_eq!(ivs[1], (20, 50, StateType::Committed, MemTag::GC));
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_commit_then_uncommit_restores_reservation() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        commit(&mut tree, 0, 40);
        let diff = uncommit(&mut tree, 0, 40);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: -40 });
        assert_eq!(keys(&tree), vec![0, 100]);
        assert_eq!(intervals(&tree), vec![(0, 100, StateType::Reserved, MemTag::GC)]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_release_in_the_middle_splits_the_reservation() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = release(&mut tree, 40, 20);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: -20, commit: 0 });
        assert_eq!(keys(&tree), vec![0, 40, 60, 100]);
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 40, StateType::Reserved, MemTag::GC),
                (40, 60, StateType::Released, MemTag::NONE),
                (60, 100, StateType::Reserved, MemTag::GC),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_reservation_hole_with_different_tag() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 300, MemTag::GC);
        let diff = reserve(&mut tree, 100, 100, MemTag::CODE);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: -100, commit: 0 });
        assert_eq!(diff.of(MemTag::CODE), SingleDiff { reserve: 100, commit: 0 });
        assert_eq!(keys(&tree), vec![0, 100, 200, 300]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_overlapping_reserve_swallows_inner_nodes() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        commit(&mut tree, 20, 20);
        commit(&mut tree, 60, 20);
        assert_eq!(keys(&tree).len(), 6);

        // Re-reserving the whole range wipes the inner structure.
        let diff = reserve(&mut tree, 0, 100, MemTag::GC);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: -40 });
        assert_eq!(keys(&tree), vec![0, 100]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_reserve_spanning_two_regions() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        reserve(&mut tree, 200, 100, MemTag::CODE);
        let diff = reserve(&mut tree, 50, 200, MemTag::CLASS);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: -50, commit: 0 });
        assert_eq!(diff.of(MemTag::CODE), SingleDiff { reserve: -50, commit: 0 });
        assert_eq!(diff.of(MemTag::CLASS), SingleDiff { reserve: 200, commit: 0 });
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 50, StateType::Reserved, MemTag::GC),
                (50, 250, StateType::Reserved, MemTag::CLASS),
                (250, 300, StateType::Reserved, MemTag::CODE),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_commit_across_committed_and_reserved_parts() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        commit(&mut tree, 0, 50);
        // Committing the full range again only adds the reserved half.
        let diff = commit(&mut tree, 0, 100);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: 50 });
        assert_eq!(keys(&tree), vec![0, 100]);
        assert_eq!(intervals(&tree), vec![(0, 100, StateType::Committed, MemTag::GC)]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_uncommit_of_reserved_memory_is_neutral() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        let diff = uncommit(&mut tree, 10, 20);
        assert!(diff.is_zero());
        assert_eq!(keys(&tree), vec![0, 100]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_left_adjacent_commit_merges() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        commit(&mut tree, 50, 25);
        let diff = commit(&mut tree, 25, 25);
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: 0, commit: 25 });
        assert_eq!(keys(&tree), vec![0, 25, 75, 100]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_set_tag_in_the_middle_splits() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 300, MemTag::GC);
        let diff = tree.set_tag(100, 100, MemTag::CODE).unwrap();
        assert_eq!(diff.of(MemTag::GC), SingleDiff { reserve: -100, commit: 0 });
        assert_eq!(diff.of(MemTag::CODE), SingleDiff { reserve: 100, commit: 0 });
        assert_eq!(keys(&tree), vec![0, 100, 200, 300]);
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 100, StateType::Reserved, MemTag::GC),
                (100, 200, StateType::Reserved, MemTag::CODE),
                (200, 300, StateType::Reserved, MemTag::GC),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_set_tag_preserves_state_types() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        commit(&mut tree, 25, 50);
        tree.set_tag(0, 100, MemTag::CODE).unwrap();
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 25, StateType::Reserved, MemTag::CODE),
                (25, 75, StateType::Committed, MemTag::CODE),
                (75, 100, StateType::Reserved, MemTag::CODE),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_set_tag_skips_released_gaps() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 0, 100, MemTag::GC);
        reserve(&mut tree, 200, 100, MemTag::GC);
        let diff = tree.set_tag(0, 300, MemTag::CODE).unwrap();
        assert_eq!(diff.of(MemTag::CODE), SingleDiff { reserve: 200, commit: 0 });
        assert_eq!(
            intervals(&tree),
            vec![
                (0, 100, StateType::Reserved, MemTag::CODE),
                (100, 200, StateType::Released, MemTag::NONE),
                (200, 300, StateType::Reserved, MemTag::CODE),
            ]
        );
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_enclosing_range_query() {
        let mut tree = VMATree::new();
        reserve(&mut tree, 100, 100, MemTag::GC);
        let (start, end) = tree.find_enclosing_range(150);
        assert_eq!(start.map(|(k, _)| k), Some(100));
        assert_eq!(end.map(|(k, _)| k), Some(200));

        let (start, end) = tree.find_enclosing_range(50);
        assert!(start.is_none());
        assert_eq!(end.map(|(k, _)| k), Some(100));
    }

    #[test]
    fn test_summary_from_walk_matches_folded_diffs() {
        let mut tree = VMATree::new();
        let mut folded = SummaryDiff::new();
        folded.apply(&reserve(&mut tree, 0, 400, MemTag::GC));
        folded.apply(&commit(&mut tree, 0, 100));
        folded.apply(&commit(&mut tree, 300, 100));
        folded.apply(&reserve(&mut tree, 150, 50, MemTag::CODE));
        folded.apply(&release(&mut tree, 350, 50));
        assert_eq!(tree.summary_from_walk(), folded);
        assert!(tree.check_invariants());
    }

    #[test]
    fn test_full_lifecycle_returns_to_empty() {
        let mut tree = VMATree::new();
        let mut folded = SummaryDiff::new();
        folded.apply(&reserve(&mut tree, 0, 100, MemTag::GC));
        folded.apply(&commit(&mut tree, 25, 50));
        folded.apply(&uncommit(&mut tree, 25, 50));
        folded.apply(&release(&mut tree, 0, 100));
        assert!(tree.is_empty());
        assert!(folded.is_zero());
    }
}
