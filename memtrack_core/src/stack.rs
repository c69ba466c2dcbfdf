//! Deduplicating storage for native call stacks.
//!
//! Tracked regions remember the call site that created them. Stacks are large
//! compared to the rest of the per-interval payload, so they are stored once
//! in a chunked table and intervals hold a compact [`StackIndex`] handle.
//! Handle equality stands in for stack equality: two pushes of the same
//! frames yield the same `(chunk, slot)` pair.
//!
//! Slots are assigned by hashing the stack into a chunk-sized table. A
//! collision overflows into the same slot of the next chunk, so lookup cost
//! is bounded by the number of chunks. Stacks are never evicted; a handle
//! stays valid for the life of the storage.
//!
//! In summary-only mode the storage is inert: every push returns the empty
//! sentinel handle and no chunk beyond the first is ever allocated.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::Position;

/// Number of program-counter slots kept per stack.
pub const STACK_DEPTH: usize = 4;

/// Number of stack slots per storage chunk.
const CHUNK_SIZE: usize = 256;

/// A captured native call stack: a fixed number of program-counter values,
/// zero-padded when the capture was shallower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeStack {
    frames: [Position; STACK_DEPTH],
}

impl NativeStack {
    /// The empty stack. Also the stack reported for every region when the
    /// tracker runs in summary-only mode.
    pub const EMPTY: NativeStack = NativeStack {
        frames: [0; STACK_DEPTH],
    };

    /// Build a stack from up to [`STACK_DEPTH`] program counters. Extra
    /// frames are dropped, missing ones are zero.
    pub fn new(pcs: &[Position]) -> Self {
        let mut frames = [0; STACK_DEPTH];
        for (slot, pc) in frames.iter_mut().zip(pcs.iter()) {
            *slot = *pc;
        }
        Self { frames }
    }

    /// Whether no frame was captured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == [0; STACK_DEPTH]
    }

    /// The captured frames, truncated at the first empty slot.
    pub fn frames(&self) -> &[Position] {
        let len = self
            .frames
            .iter()
            .position(|pc| *pc == 0)
            .unwrap_or(STACK_DEPTH);
        &self.frames[..len]
    }

    fn hash_value(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.frames.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compact handle for a stored stack: which chunk and which slot within it.
/// Two handles are equal iff they denote the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackIndex {
    chunk: u16,
    slot: u16,
}

impl StackIndex {
    /// The sentinel handle carried by released regions and by every region
    /// in summary-only mode.
    pub const EMPTY: StackIndex = StackIndex { chunk: 0, slot: 0 };

    /// Chunk component.
    #[inline]
    pub fn chunk(self) -> u16 {
        self.chunk
    }

    /// Slot component.
    #[inline]
    pub fn slot(self) -> u16 {
        self.slot
    }
}

/// One fixed-size block of stack slots. Boxed so growth never moves stored
/// stacks; `get` hands out references that stay valid while the storage
/// lives.
struct StackChunk {
    stacks: [NativeStack; CHUNK_SIZE],
}

impl StackChunk {
    fn new() -> Box<StackChunk> {
        Box::new(StackChunk {
            stacks: [NativeStack::EMPTY; CHUNK_SIZE],
        })
    }
}

/// Append-only dedup store of [`NativeStack`]s, addressed by [`StackIndex`].
///
/// Not synchronized; callers serialize access (the tracker holds its lock
/// across every push and get).
pub struct CallStackStorage {
    chunks: Vec<Box<StackChunk>>,
    detailed: bool,
}

impl CallStackStorage {
    /// Create a storage. With `detailed` false, pushes are inert and return
    /// the sentinel handle.
    pub fn new(detailed: bool) -> Self {
        // One chunk always exists so the sentinel handle resolves.
        Self {
            chunks: vec![StackChunk::new()],
            detailed,
        }
    }

    /// Whether stacks are being deduplicated and stored.
    #[inline]
    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Store `stack` if it is not already present and return its handle.
    pub fn push(&mut self, stack: &NativeStack) -> StackIndex {
        if !self.detailed || stack.is_empty() {
            return StackIndex::EMPTY;
        }
        // Slot 0 stays empty in every chunk so the sentinel handle never
        // aliases a stored stack.
        let slot = 1 + (stack.hash_value() % (CHUNK_SIZE as u64 - 1)) as usize;
        for (i, chunk) in self.chunks.iter_mut().enumerate() {
            let stored = &mut chunk.stacks[slot];
            if stored.is_empty() {
                *stored = *stack;
                return StackIndex {
                    chunk: i as u16,
                    slot: slot as u16,
                };
            }
            if *stored == *stack {
                return StackIndex {
                    chunk: i as u16,
                    slot: slot as u16,
                };
            }
        }
        // Every existing chunk has this slot taken by some other stack.
        let chunk = self.chunks.len();
        debug_assert!(chunk <= u16::MAX as usize);
        let mut new_chunk = StackChunk::new();
        new_chunk.stacks[slot] = *stack;
        self.chunks.push(new_chunk);
        StackIndex {
            chunk: chunk as u16,
            slot: slot as u16,
        }
    }

    /// The stack stored under `idx`. The reference is stable: chunks are
    /// never freed or moved.
    pub fn get(&self, idx: StackIndex) -> &NativeStack {
        &self.chunks[idx.chunk() as usize].stacks[idx.slot() as usize]
    }
}
