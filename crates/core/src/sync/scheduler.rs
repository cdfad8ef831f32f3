//! Scheduler constants/helpers for feed refresh and queue retry.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum gap between two throttled feed refreshes.
pub const FEED_REFRESH_INTERVAL_SECS: u64 = 60 * 5;

/// Maximum jitter (seconds) added to the periodic refresh interval.
pub const FEED_REFRESH_JITTER_SECS: u64 = 5;

/// Failed sync attempts after which a pending record is dropped.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Whether a throttled refresh may hit the network.
pub fn refresh_due(last_success: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last_success {
        None => true,
        Some(last) => now.saturating_duration_since(last) > interval,
    }
}

/// Delay before the next periodic refresh, with up to
/// `FEED_REFRESH_JITTER_SECS` of jitter derived from `seed_millis`.
pub fn periodic_delay(interval: Duration, seed_millis: u64) -> Duration {
    let jitter_bound = FEED_REFRESH_JITTER_SECS.saturating_mul(1000);
    let jitter_ms = if jitter_bound > 0 {
        seed_millis % jitter_bound
    } else {
        0
    };
    interval + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_refresh_is_always_due() {
        assert!(refresh_due(None, Instant::now(), Duration::from_secs(300)));
    }

    #[test]
    fn refresh_inside_interval_is_throttled() {
        let last = Instant::now();
        let interval = Duration::from_secs(FEED_REFRESH_INTERVAL_SECS);
        assert!(!refresh_due(Some(last), last + Duration::from_secs(299), interval));
        assert!(!refresh_due(Some(last), last + interval, interval));
        assert!(refresh_due(Some(last), last + Duration::from_secs(301), interval));
    }

    #[test]
    fn periodic_delay_jitter_is_bounded() {
        let interval = Duration::from_secs(60);
        assert_eq!(periodic_delay(interval, 0), interval);
        let delay = periodic_delay(interval, u64::MAX);
        assert!(delay < interval + Duration::from_secs(FEED_REFRESH_JITTER_SECS));
    }
}
