//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
/// capped at `cap`, plus up to 10% jitter so synchronized clients spread out.
pub fn exponential_delay(retry: u32, base: Duration, cap: Duration) -> Duration {
    let Some(exponent) = retry.checked_sub(1) else {
        return Duration::ZERO;
    };

    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor).min(cap);

    let spread = delay / 10;
    if spread.is_zero() {
        return delay;
    }
    delay + rand::thread_rng().gen_range(Duration::ZERO..spread)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_doubles_until_cap() {
        let first = exponential_delay(1, BASE, Duration::from_secs(2));
        assert!(first >= BASE && first < Duration::from_millis(110));

        let third = exponential_delay(3, BASE, Duration::from_secs(2));
        assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(440));

        let capped = exponential_delay(40, BASE, Duration::from_secs(1));
        assert!(capped >= Duration::from_secs(1) && capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_no_delay_before_first_retry() {
        assert_eq!(exponential_delay(0, BASE, Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(exponential_delay(3, Duration::ZERO, Duration::from_secs(1)), Duration::ZERO);
    }
}
