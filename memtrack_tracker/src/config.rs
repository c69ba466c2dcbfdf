//! Tracker configuration.

/// Configuration for a [`crate::Tracker`].
///
/// # Example
///
/// ```ignore
/// use memtrack_tracker::TrackerConfig;
///
/// // Full call-site attribution for a debugging run.
/// let config = TrackerConfig {
///     detailed: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Store and deduplicate call stacks.
    ///
    /// When false the tracker runs in summary-only mode: per-tag counters
    /// and the interval map are maintained, but every region carries the
    /// empty call-site handle and the stack storage never grows.
    ///
    /// Default: false
    pub detailed: bool,

    /// Re-check the tree's structural invariants and the counter totals
    /// after every mutation.
    ///
    /// Expensive but useful when chasing accounting bugs.
    ///
    /// Default: false (enabled in debug builds)
    pub verify_invariants: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detailed: false,
            verify_invariants: cfg!(debug_assertions),
        }
    }
}

impl TrackerConfig {
    /// Summary-only operation: counters without call sites.
    pub fn summary() -> Self {
        Self {
            detailed: false,
            ..Default::default()
        }
    }

    /// Full operation: counters plus deduplicated call stacks.
    pub fn detailed() -> Self {
        Self {
            detailed: true,
            ..Default::default()
        }
    }
}
