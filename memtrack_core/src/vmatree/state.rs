//! Per-interval payload: mapping state, memory tag and call-site handle.

use crate::stack::StackIndex;
use crate::tag::MemTag;

/// What the process has done with a byte range.
///
/// The discriminants form a bit view: bit 0 means reserved, bit 1 means
/// committed. Committing preserves the reserved bit, so `Committed` implies
/// `Reserved` wherever the bits are inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StateType {
    /// Neither claimed nor backed. The identity state.
    Released = 0,
    /// Claimed from the OS but not backed.
    Reserved = 1,
    /// Claimed and promised physical backing.
    Committed = 3,
}

impl StateType {
    /// Whether this state counts toward reserved bytes.
    #[inline]
    pub fn covers_reserved(self) -> bool {
        (self as u8) & 1 != 0
    }

    /// Whether this state counts toward committed bytes.
    #[inline]
    pub fn covers_committed(self) -> bool {
        (self as u8) & 2 != 0
    }

    /// Literal used by reports.
    pub fn as_str(self) -> &'static str {
        match self {
            StateType::Released => "released",
            StateType::Reserved => "reserved",
            StateType::Committed => "committed",
        }
    }

    fn from_raw(raw: u8) -> StateType {
        match raw {
            1 => StateType::Reserved,
            3 => StateType::Committed,
            _ => StateType::Released,
        }
    }
}

/// The metadata attributed to an interval: the call site that created it and
/// the memory category it belongs to. Equality is pairwise; the stack handle
/// compares by identity, not by stack content, so distinct call sites stay
/// distinct even when their captured frames happen to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionData {
    /// Handle into the call-stack storage.
    pub stack_idx: StackIndex,
    /// Memory category.
    pub tag: MemTag,
}

impl RegionData {
    /// The metadata carried by released intervals.
    pub const EMPTY: RegionData = RegionData {
        stack_idx: StackIndex::EMPTY,
        tag: MemTag::NONE,
    };

    /// Build metadata for a tracked interval.
    pub fn new(stack_idx: StackIndex, tag: MemTag) -> Self {
        Self { stack_idx, tag }
    }
}

/// State plus metadata, packed to eight bytes: two bytes for the state and
/// tag, four for the stack handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalState {
    type_tag: [u8; 2],
    stack: StackIndex,
}

impl IntervalState {
    /// The released state with sentinel metadata.
    pub const RELEASED: IntervalState = IntervalState {
        type_tag: [0, 0],
        stack: StackIndex::EMPTY,
    };

    /// Combine a state with its metadata. Released intervals must carry the
    /// sentinel metadata.
    pub fn new(state: StateType, data: RegionData) -> Self {
        debug_assert!(
            state != StateType::Released || data.tag.is_none(),
            "released intervals carry no tag"
        );
        Self {
            type_tag: [state as u8, data.tag.index() as u8],
            stack: data.stack_idx,
        }
    }

    /// The mapping state.
    #[inline]
    pub fn state(&self) -> StateType {
        StateType::from_raw(self.type_tag[0])
    }

    /// The memory tag.
    #[inline]
    pub fn tag(&self) -> MemTag {
        MemTag::from_index(self.type_tag[1] as usize).unwrap_or(MemTag::NONE)
    }

    /// The call-site handle.
    #[inline]
    pub fn stack(&self) -> StackIndex {
        self.stack
    }

    /// Tag and stack handle as one value.
    pub fn region_data(&self) -> RegionData {
        RegionData {
            stack_idx: self.stack,
            tag: self.tag(),
        }
    }

    /// Rewrite the tag, leaving state and stack untouched.
    pub fn set_tag(&mut self, tag: MemTag) {
        self.type_tag[1] = tag.index() as u8;
    }
}

/// The state change recorded at a tree node. `in_state` describes the
/// interval ending at the node's key, `out_state` the interval starting
/// there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalChange {
    /// State of the interval ending at this node.
    pub in_state: IntervalState,
    /// State of the interval starting at this node.
    pub out_state: IntervalState,
}

impl IntervalChange {
    /// A node marking no actual change carries no information and must not
    /// stay in the tree.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.in_state == self.out_state
    }
}
