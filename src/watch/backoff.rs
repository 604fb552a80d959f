/// Upper bound on the retry delay after repeated sync failures.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 300_000;

/// Delay before the next attempt after `consecutive_failures` failed syncs.
///
/// Zero failures means no delay; the first failure waits `base_interval_ms`,
/// and every further failure doubles that, capped at `max_delay_ms`.
pub fn compute_backoff_delay(consecutive_failures: u32, base_interval_ms: u64, max_delay_ms: u64) -> u64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let doublings = (consecutive_failures - 1).min(63);
    let factor = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
    base_interval_ms.saturating_mul(factor).min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(compute_backoff_delay(0, 5000, DEFAULT_MAX_BACKOFF_MS), 0);
    }

    #[test]
    fn test_doubles_from_base() {
        assert_eq!(compute_backoff_delay(1, 5000, DEFAULT_MAX_BACKOFF_MS), 5000);
        assert_eq!(compute_backoff_delay(2, 5000, DEFAULT_MAX_BACKOFF_MS), 10000);
        assert_eq!(compute_backoff_delay(3, 5000, DEFAULT_MAX_BACKOFF_MS), 20000);
    }

    #[test]
    fn test_capped() {
        assert_eq!(compute_backoff_delay(100, 5000, 300_000), 300_000);
        assert_eq!(compute_backoff_delay(u32::MAX, u64::MAX, 7), 7);
    }
}
