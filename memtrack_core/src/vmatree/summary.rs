//! Per-tag accounting deltas produced by tree mutations.

use crate::tag::MemTag;

/// Signed change in reserved and committed bytes for one tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleDiff {
    /// Delta in reserved bytes. Committed bytes also count as reserved.
    pub reserve: i64,
    /// Delta in committed bytes.
    pub commit: i64,
}

impl SingleDiff {
    #[inline]
    fn is_zero(&self) -> bool {
        self.reserve == 0 && self.commit == 0
    }
}

/// The per-tag change produced by one mapping operation. Folding every diff
/// into per-tag counters keeps summary reporting free of tree walks.
///
/// Boxed internally: the full tag universe is carried so lookups are plain
/// indexing, but the array should not travel by value through every caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryDiff {
    tags: Box<[SingleDiff; MemTag::MAX_TAGS]>,
}

impl SummaryDiff {
    /// The all-zero diff.
    pub fn new() -> Self {
        Self {
            tags: Box::new([SingleDiff::default(); MemTag::MAX_TAGS]),
        }
    }

    /// The delta recorded for `tag`.
    #[inline]
    pub fn of(&self, tag: MemTag) -> SingleDiff {
        self.tags[tag.index()]
    }

    /// Mutable access to the delta for `tag`.
    #[inline]
    pub fn of_mut(&mut self, tag: MemTag) -> &mut SingleDiff {
        &mut self.tags[tag.index()]
    }

    /// Fold `other` into this diff.
    pub fn apply(&mut self, other: &SummaryDiff) {
        for (mine, theirs) in self.tags.iter_mut().zip(other.tags.iter()) {
            mine.reserve += theirs.reserve;
            mine.commit += theirs.commit;
        }
    }

    /// Whether no tag changed.
    pub fn is_zero(&self) -> bool {
        self.tags.iter().all(SingleDiff::is_zero)
    }

    /// The tags with a non-zero delta, in tag order.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (MemTag, SingleDiff)> + '_ {
        self.tags
            .iter()
            .enumerate()
            .filter(|(_, diff)| !diff.is_zero())
            .map(|(index, diff)| {
                let tag = MemTag::from_index(index).unwrap_or(MemTag::NONE);
                (tag, *diff)
            })
    }

    /// The net change summed over every tag.
    pub fn net(&self) -> SingleDiff {
        let mut net = SingleDiff::default();
        for diff in self.tags.iter() {
            net.reserve += diff.reserve;
            net.commit += diff.commit;
        }
        net
    }
}

impl Default for SummaryDiff {
    fn default() -> Self {
        Self::new()
    }
}
