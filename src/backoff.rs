//! Pure restart-delay calculation.
//!
//! Exponential backoff with base 2, saturating at a configured maximum. Deterministic
//! and cheap to unit-test; no jitter.

use std::time::Duration;

/// Compute the delay before the next restart attempt.
///
/// `attempt = 0` returns `initial`. For `attempt >= 1` the delay is
/// `min(initial * 2^(attempt-1), max)`.
pub fn next_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return initial;
    }

    let shift = attempt - 1;
    let scaled = if shift >= u32::BITS {
        max
    } else {
        initial.checked_mul(1u32 << shift).unwrap_or(max)
    };

    scaled.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn attempt_zero_returns_initial() {
        let d = next_delay(0, Duration::from_millis(10), Duration::from_millis(40));
        assert_eq!(d, Duration::from_millis(10));
    }

    #[test]
    fn doubles_each_attempt_until_saturating() {
        let initial = Duration::from_millis(10);
        let max = Duration::from_millis(40);
        assert_eq!(next_delay(1, initial, max), Duration::from_millis(10));
        assert_eq!(next_delay(2, initial, max), Duration::from_millis(20));
        assert_eq!(next_delay(3, initial, max), Duration::from_millis(40));
        assert_eq!(next_delay(4, initial, max), Duration::from_millis(40));
    }

    #[test]
    fn never_exceeds_max_for_large_attempt_counts() {
        let initial = Duration::from_millis(10);
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(1000, initial, max), max);
    }

    #[test]
    fn is_monotone_non_decreasing() {
        let initial = Duration::from_millis(5);
        let max = Duration::from_millis(500);
        let mut prev = Duration::ZERO;
        for attempt in 0..20 {
            let d = next_delay(attempt, initial, max);
            assert!(d >= prev, "backoff decreased at attempt {attempt}");
            assert!(d <= max);
            prev = d;
        }
    }
}
