//! Per-market write throttle.
//!
//! Price updates for a busy market arrive many times per second, but the
//! relational store only needs a snapshot every few seconds. [`ThrottleMap`]
//! keeps one last-write instant per market id and answers whether an update
//! arriving now is outside the window. What happens to a rejected update is
//! up to the owner.
//!
//! Market ids are hashed with xxHash64 into fixed-width keys so the map never
//! stores the id strings themselves.

use std::time::{Duration, Instant};

use ahash::AHashMap;

/// Per-market last-write gate.
///
/// # Thread safety
///
/// Not thread-safe. The owner wraps it in a mutex when shared.
pub struct ThrottleMap {
    window: Duration,
    last_write: AHashMap<u64, Instant>,
}

impl ThrottleMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_write: AHashMap::new(),
        }
    }

    #[inline]
    fn key(market_id: &str) -> u64 {
        xxhash_rust::xxh64::xxh64(market_id.as_bytes(), 0)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check whether a write for `market_id` is eligible at `now`.
    ///
    /// Returns `true` if the window has elapsed since the last accepted write
    /// (or there was none); the entry is then updated to `now`. Returns
    /// `false` without touching the entry otherwise.
    #[inline]
    pub fn check_and_mark(&mut self, market_id: &str, now: Instant) -> bool {
        let key = Self::key(market_id);
        match self.last_write.get(&key) {
            Some(last) if now.saturating_duration_since(*last) < self.window => false,
            _ => {
                self.last_write.insert(key, now);
                true
            }
        }
    }

    /// Forget a market (e.g. once it has closed).
    pub fn remove(&mut self, market_id: &str) {
        self.last_write.remove(&Self::key(market_id));
    }

    pub fn len(&self) -> usize {
        self.last_write.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_write.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_write_inside_window_is_rejected() {
        let mut t = ThrottleMap::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(t.check_and_mark("1.23", t0));
        assert!(!t.check_and_mark("1.23", t0 + Duration::from_secs(2)));
        // A rejected check must not extend the window.
        assert!(t.check_and_mark("1.23", t0 + Duration::from_secs(5)));
        assert!(!t.check_and_mark("1.23", t0 + Duration::from_secs(6)));
    }

    #[test]
    fn window_boundary_is_eligible() {
        let mut t = ThrottleMap::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(t.check_and_mark("1.23", t0));
        assert!(t.check_and_mark("1.23", t0 + Duration::from_secs(5)));
    }

    #[test]
    fn markets_are_independent() {
        let mut t = ThrottleMap::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(t.check_and_mark("1.23", t0));
        assert!(t.check_and_mark("1.24", t0));
        assert!(!t.check_and_mark("1.23", t0 + Duration::from_millis(10)));
        assert_eq!(t.len(), 2);

        t.remove("1.23");
        assert!(t.check_and_mark("1.23", t0 + Duration::from_millis(20)));
        t.remove("1.23");
        t.remove("1.24");
        assert!(t.is_empty());
    }
}
