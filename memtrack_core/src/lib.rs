//! Memtrack Core
//!
//! Data structures for tracking the virtual-memory activity of a managed
//! runtime: every reservation, commitment, uncommitment and release of an
//! address range, attributed to a memory tag and a call site.
//!
//! # Architecture
//!
//! The core is built from four pieces:
//!
//! - **[`treap::Treap`]**: A randomized balanced search tree keyed by address.
//!   All tree operations are composed from `split` and `merge`, which keeps
//!   the interval surgery in [`vmatree`] short.
//!
//! - **[`vmatree::VMATree`]**: An interval map over the whole address space.
//!   Each tree node marks an inflection point where the mapping state
//!   changes; everything between two nodes is one uniform interval. The sole
//!   mutating operation, [`vmatree::VMATree::register_mapping`], rewrites an
//!   arbitrary range and returns the per-tag delta in reserved and committed
//!   bytes so callers can keep summary counters without walking the tree.
//!
//! - **[`stack::CallStackStorage`]**: A deduplicating store of native call
//!   stacks. Intervals hold a compact 32-bit [`stack::StackIndex`] instead of
//!   the stack itself, so node size stays fixed and stack equality is a
//!   two-field compare.
//!
//! - **[`tag::TagNameTable`]**: An append-only two-way mapping between
//!   human-readable tag names and the compact [`tag::MemTag`] integers stored
//!   in the tree.
//!
//! # Usage
//!
//! ```ignore
//! use memtrack_core::vmatree::VMATree;
//! use memtrack_core::vmatree::{RegionData, StateType};
//!
//! let mut tree = VMATree::new();
//! let diff = tree
//!     .register_mapping(0x1000, 0x5000, StateType::Reserved, data, false)
//!     .unwrap_or_default();
//! ```
//!
//! The core never maps or allocates the memory it describes; it only records
//! what the rest of the runtime reports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod stack;
pub mod tag;
pub mod treap;
pub mod vmatree;

// Re-exports for convenient access
pub use stack::{CallStackStorage, NativeStack, StackIndex};
pub use tag::{MemTag, TagNameTable};
pub use vmatree::{RegionData, SingleDiff, StateType, SummaryDiff, VMATree};

/// A position in the process's virtual address space, in bytes.
///
/// Comparison is plain numeric order.
pub type Position = usize;
