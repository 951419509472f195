//! Fixed-window policy.
//!
//! Counts reset at fixed boundaries, so a client may spend its whole quota at
//! the end of one window and again at the start of the next. That burst is
//! accepted behaviour for this limiter.

use chrono::{DateTime, Utc};

use crate::domain::Decision;

/// Apply a limit to the number of hits seen in the current window.
pub fn evaluate(count: u64, limit: u64) -> Decision {
    Decision {
        allowed: count <= limit,
        remaining: limit.saturating_sub(count),
        retry_after_seconds: 0,
    }
}

/// Whole seconds until `expires_at`, rounded up and clamped to `[0, window_seconds]`.
pub fn retry_after_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>, window_seconds: u64) -> u64 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    let secs = (millis as u64).div_ceil(1000);
    secs.min(window_seconds)
}
