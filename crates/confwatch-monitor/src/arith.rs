//! Tick arithmetic for change timing.
//!
//! Counters are expressed in TimeTicks, hundredths of a second. Everything
//! here is pure; the poller supplies the wall clock.

use chrono::{DateTime, TimeDelta, Utc};

/// TimeTicks per second.
pub const TICKS_PER_SECOND: u64 = 100;

/// Convert a raw tick delta into a duration.
pub fn ticks_to_duration(ticks: u64) -> TimeDelta {
    let millis = i64::try_from(ticks.saturating_mul(10)).unwrap_or(i64::MAX);
    TimeDelta::milliseconds(millis)
}

/// Estimate the wall-clock instant a change occurred, given how many ticks
/// ago it happened relative to `now`.
pub fn estimate_change_time(now: DateTime<Utc>, ticks_ago: u64) -> DateTime<Utc> {
    now - ticks_to_duration(ticks_ago)
}

/// Render a duration as a compact human string, e.g. `2d 03:14:07`.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let mins = (total % 3_600) / 60;
    let secs = total % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{mins:02}:{secs:02}")
    } else {
        format!("{hours:02}:{mins:02}:{secs:02}")
    }
}
