//! Per-tag summary and status rendering.

use std::fmt::Write;

use memtrack_tracker::Tracker;

use crate::kb;

/// Render one line per tag with non-zero totals:
///
/// ```text
/// gc: reserved=4096KB committed=1024KB
/// ```
pub fn summary_report(tracker: &Tracker) -> String {
    let snapshot = tracker.snapshot();
    let mut out = String::new();
    for (tag, usage) in snapshot.iter_nonzero() {
        let _ = writeln!(
            out,
            "{}: reserved={}KB committed={}KB",
            tracker.name_of(tag),
            kb(usage.reserved),
            kb(usage.committed),
        );
    }
    out
}

/// Render the tracker's one-line health status.
pub fn status_line(tracker: &Tracker) -> String {
    let status = tracker.status();
    let mode = if status.detailed { "detail" } else { "summary" };
    let mut line = format!("memory tracking: {} mode, dropped={}", mode, status.dropped);
    if status.degraded {
        line.push_str(", degraded");
    }
    line
}
