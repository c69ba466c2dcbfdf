//! Memtrack Tracker
//!
//! The recording surface the rest of the runtime calls. Every reservation,
//! commitment, uncommitment and release of a virtual address range goes
//! through the [`Tracker`] facade, which serializes mutations behind one
//! lock, forwards them to the interval tree and folds the returned per-tag
//! deltas into live summary counters.
//!
//! # Architecture
//!
//! - **[`regions::RegionsTree`]**: Couples the interval tree with the
//!   call-stack storage and chooses the right metadata discipline for each
//!   operation kind (a commit inherits the reservation's tag, a release
//!   wipes metadata, and so on).
//!
//! - **[`tracker::Tracker`]**: The process-facing facade. Owns the tree, the
//!   stack storage, the tag name table and the per-tag counters behind a
//!   single mutex, so readers always observe a state consistent with some
//!   prefix of the recorded operations.
//!
//! Recording never fails toward the caller: an update the tracker cannot
//! apply (allocation failure in the tree) is dropped and counted, and a
//! counter that would go negative is clamped while the tracker flags itself
//! as degraded. Tracking is strictly best-effort observability.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod regions;
pub mod tracker;

// Re-exports for convenient access
pub use config::TrackerConfig;
pub use regions::{CommittedRegion, RegionsTree, ReservedRegion};
pub use tracker::{
    init, instance, tracker, Snapshot, TagUsage, TrackedInterval, Tracker, TrackerStatus,
};
