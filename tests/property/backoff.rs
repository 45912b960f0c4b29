//! Property-based backoff schedule tests.
//!
//! Uses proptest to verify:
//! 1. Send-retry backoff is monotonically nondecreasing and never exceeds
//!    its cap.
//! 2. Below the cap the schedule is exactly `2^attempt` seconds.
//! 3. Reconnect delays stay within `[base, base + jitter)` and collapse to
//!    the exact base when jitter is zero.

use std::time::Duration;

use proptest::prelude::*;
use teamchat::config::ReconnectConfig;
use teamchat::outbox::retry_backoff;
use teamchat::realtime::reconnect_delay;

/// The base reconnect delay without jitter, recomputed independently.
fn expected_base(attempt: u32, config: &ReconnectConfig) -> Duration {
    config
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt.min(31)))
        .min(config.max_delay)
}

proptest! {
    /// Backoff never shrinks as attempts grow, and never exceeds the cap.
    #[test]
    fn retry_backoff_is_monotone_and_capped(
        attempt in 0u32..40,
        step in 1u32..10,
        cap_secs in 1u64..120,
    ) {
        let cap = Duration::from_secs(cap_secs);
        let earlier = retry_backoff(attempt, cap);
        let later = retry_backoff(attempt + step, cap);
        prop_assert!(earlier <= later);
        prop_assert!(later <= cap);
    }

    /// While `2^attempt` seconds fits under the cap, the schedule is exact:
    /// 1, 2, 4, 8, ... seconds.
    #[test]
    fn retry_backoff_doubles_below_the_cap(attempt in 0u32..20, cap_secs in 1u64..3600) {
        let cap = Duration::from_secs(cap_secs);
        let exact = 1u64 << attempt;
        if exact <= cap_secs {
            prop_assert_eq!(retry_backoff(attempt, cap), Duration::from_secs(exact));
        } else {
            prop_assert_eq!(retry_backoff(attempt, cap), cap);
        }
    }

    /// A jittered reconnect delay never undershoots its base and never
    /// reaches `base + jitter`.
    #[test]
    fn reconnect_delay_stays_within_jitter_band(
        initial_ms in 1u64..5_000,
        extra_ms in 0u64..20_000,
        jitter_ms in 1u64..1_000,
        attempt in 0u32..40,
    ) {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(initial_ms + extra_ms),
            jitter: Duration::from_millis(jitter_ms),
            connect_timeout: Duration::from_secs(10),
        };
        let base = expected_base(attempt, &config);
        let delay = reconnect_delay(attempt, &config);
        prop_assert!(delay >= base);
        prop_assert!(delay < base + config.jitter);
    }

    /// With zero jitter the delay is the exact doubling schedule, capped,
    /// and nondecreasing.
    #[test]
    fn reconnect_delay_without_jitter_is_exact(
        initial_ms in 1u64..5_000,
        extra_ms in 0u64..20_000,
        attempt in 0u32..40,
    ) {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(initial_ms + extra_ms),
            jitter: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
        };
        let delay = reconnect_delay(attempt, &config);
        prop_assert_eq!(delay, expected_base(attempt, &config));
        prop_assert!(delay <= config.max_delay);
        prop_assert!(reconnect_delay(attempt + 1, &config) >= delay);
    }
}
