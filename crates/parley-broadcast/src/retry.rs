// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded exponential backoff for transient send failures.

use std::time::Duration;

use parley_config::model::BroadcastConfig;
use rand::Rng;

/// Retry schedule for one recipient send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self {
            max_attempts: config.max_send_attempts.max(1),
            base_ms: config.retry_base_ms,
            max_ms: config.retry_max_ms,
            jitter: true,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt that follows failed attempt `attempt`.
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_ms.max(1);
        let max = self.max_ms.max(base);
        let exp = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .map_or(max, |pow| base.saturating_mul(pow))
            .min(max);
        if self.jitter && exp > 3 {
            let extra = rand::thread_rng().gen_range(0..=exp / 4);
            Duration::from_millis(exp.saturating_add(extra).min(max))
        } else {
            Duration::from_millis(exp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_ms: 500,
            max_ms: 30_000,
            jitter: false,
        }
    }

    #[test]
    fn doubles_then_caps() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(p.delay_for_attempt(10), Duration::from_millis(30_000));
        assert_eq!(p.delay_for_attempt(200), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_cap() {
        let p = RetryPolicy { jitter: true, ..policy() };
        for attempt in 1..8 {
            let d = p.delay_for_attempt(attempt);
            assert!(d <= Duration::from_millis(30_000));
            assert!(d >= Duration::from_millis(500));
        }
    }

    #[test]
    fn attempt_budget() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));

        let cfg = BroadcastConfig {
            max_send_attempts: 0,
            ..BroadcastConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 1);
    }

    proptest::proptest! {
        #[test]
        fn delay_is_monotone_and_bounded(
            base in 1u64..5_000,
            span in 0u64..120_000,
            attempt in 1u32..100,
        ) {
            let p = RetryPolicy { max_attempts: 5, base_ms: base, max_ms: base + span, jitter: false };
            let d = p.delay_for_attempt(attempt);
            proptest::prop_assert!(d >= Duration::from_millis(base));
            proptest::prop_assert!(d <= Duration::from_millis(base + span));
            proptest::prop_assert!(p.delay_for_attempt(attempt + 1) >= d);
        }
    }
}
