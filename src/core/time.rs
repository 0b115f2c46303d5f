//! Wall-Clock Time
//!
//! Every handler takes `now` as an argument so tests can drive time
//! explicitly. Only the network layer reads the real clock.

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis().max(0) as Millis
}

/// Whole seconds elapsed between `since` and `now` (zero if `now` is earlier).
#[inline]
pub fn elapsed_secs(since: Millis, now: Millis) -> u64 {
    now.saturating_sub(since) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_elapsed_secs_saturates() {
        assert_eq!(elapsed_secs(10_000, 15_999), 5);
        assert_eq!(elapsed_secs(10_000, 5_000), 0);
    }
}
