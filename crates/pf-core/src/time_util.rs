//! Wall-clock time utilities.
//!
//! Persisted rows and log lines carry Unix-epoch timestamps; elapsed-time
//! decisions (throttle, deadlines) use `Instant` instead.

use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
fn since_epoch() -> std::time::Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    since_epoch().as_millis() as u64
}
