//! Log throttling utility.
//!
//! Limits how often the same log message is recorded, preventing log flooding when a
//! condition (a disconnected device, an unreachable remote) repeats on every tick.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Log throttler that limits how often the same message is logged.
pub struct LogThrottler {
    last_logged: RwLock<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if `key` should be logged now (and records that it was), `false` if
    /// it was already logged within the throttle interval.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();

        {
            let map = self.last_logged.read().unwrap();
            if let Some(last) = map.get(key) {
                if now.duration_since(*last) < self.interval {
                    return false;
                }
            }
        }

        let mut map = self.last_logged.write().unwrap();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Clear throttle state for `key`. Call this once a condition recovers so the next
    /// occurrence logs immediately instead of waiting out the interval.
    pub fn clear(&self, key: &str) {
        self.last_logged.write().unwrap().remove(key);
    }
}

impl Default for LogThrottler {
    /// 5 second throttle interval.
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`: logs only if `key` hasn't logged within `throttler`'s interval.
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `tracing::error!`: logs only if `key` hasn't logged within `throttler`'s interval.
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_call_always_logs() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn repeat_calls_within_interval_are_throttled() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn different_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert!(!throttler.should_log("key2"));
    }

    #[test]
    fn clear_allows_immediate_relog() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        throttler.clear("test_key");
        assert!(throttler.should_log("test_key"));
    }
}
