//! Detailed virtual-memory map rendering.

use std::fmt::Write;

use memtrack_tracker::{TrackedInterval, Tracker};

use crate::kb;

/// Render one block per tracked interval, in address order:
///
/// ```text
/// [0x1000 - 0x5000) reserved gc 16KB
///     0x7f3a0000
///     0x7f3a0010
/// ```
///
/// Released gaps between regions appear with no tag charge and no frames.
/// The map is collected under the tracker's lock and rendered afterwards.
pub fn detail_report(tracker: &Tracker) -> String {
    let mut intervals: Vec<TrackedInterval> = Vec::new();
    tracker.walk(|iv| {
        intervals.push(*iv);
        true
    });

    let mut out = String::new();
    for iv in &intervals {
        let _ = writeln!(
            out,
            "[{:#x} - {:#x}) {} {} {}KB",
            iv.base,
            iv.end,
            iv.state.as_str(),
            tracker.name_of(iv.tag),
            kb(iv.size() as u64),
        );
        for pc in iv.stack.frames() {
            let _ = writeln!(out, "    {:#x}", pc);
        }
    }
    out
}
