//! Exponential backoff for the polling channels and stream reconnects.
//!
//! Each channel owns a [`ChannelBackoff`]. While the backend is healthy
//! the channel ticks at its base interval. After
//! [`BackoffPolicy::after_failures`] consecutive failures the delay grows
//! by [`BackoffPolicy::multiplier`] per further failure, capped at
//! [`BackoffPolicy::max_delay`], with a small random jitter so several
//! clients do not retry in lockstep. One success resets the delay.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Consecutive failures tolerated at the base interval.
    pub after_failures: u32,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each further failure.
    pub multiplier: f64,
    /// Maximum jitter as a fraction of the delay (`0.1` = up to 10%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            after_failures: 3,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`BackoffPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &BackoffPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Add up to `fraction` of `delay` as random jitter.
pub fn with_jitter(delay: Duration, fraction: f64) -> Duration {
    let spread_ms = (delay.as_millis() as f64 * fraction.clamp(0.0, 1.0)) as u64;
    if spread_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread_ms))
}

/// Per-channel failure counter and current delay.
#[derive(Debug, Clone)]
pub struct ChannelBackoff {
    base: Duration,
    current: Duration,
    consecutive_failures: u32,
    policy: BackoffPolicy,
}

impl ChannelBackoff {
    pub fn new(base: Duration, policy: BackoffPolicy) -> Self {
        Self {
            base,
            current: base,
            consecutive_failures: 0,
            policy,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next tick, without jitter.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// `true` once the delay has grown past the base interval.
    pub fn is_backing_off(&self) -> bool {
        self.current > self.base
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current = self.base;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.after_failures {
            self.current = next_delay(self.current, &self.policy).max(self.base);
        }
    }

    /// Delay to sleep before the next tick. Jitter only applies while
    /// backing off, so a healthy channel keeps its exact interval.
    pub fn next_wait(&self) -> Duration {
        if self.is_backing_off() {
            with_jitter(self.current, self.policy.jitter)
        } else {
            self.current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // next_delay
    // -----------------------------------------------------------------------

    #[test]
    fn next_delay_doubles() {
        let policy = BackoffPolicy::default();
        let d = next_delay(Duration::from_secs(1), &policy);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &policy);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn custom_multiplier() {
        let policy = BackoffPolicy {
            multiplier: 3.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(2), &policy);
        assert_eq!(d, Duration::from_secs(6));
    }

    // -----------------------------------------------------------------------
    // with_jitter
    // -----------------------------------------------------------------------

    #[test]
    fn jitter_stays_within_fraction() {
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let d = with_jitter(base, 0.1);
            assert!(d >= base && d <= Duration::from_millis(1100), "{d:?}");
        }
    }

    #[test]
    fn zero_jitter_is_identity() {
        assert_eq!(with_jitter(Duration::from_millis(500), 0.0), Duration::from_millis(500));
    }

    // -----------------------------------------------------------------------
    // ChannelBackoff
    // -----------------------------------------------------------------------

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn base_interval_until_threshold() {
        let mut backoff = ChannelBackoff::new(Duration::from_secs(1), no_jitter());
        backoff.record_failure();
        backoff.record_failure();

        assert!(!backoff.is_backing_off());
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
    }

    #[test]
    fn full_backoff_sequence() {
        let mut backoff = ChannelBackoff::new(Duration::from_secs(1), no_jitter());
        let expected = [1, 1, 2, 4, 8, 16, 30, 30];

        for &expected_secs in &expected {
            backoff.record_failure();
            assert_eq!(backoff.next_wait().as_secs(), expected_secs);
        }
    }

    #[test]
    fn success_resets_to_base() {
        let mut backoff = ChannelBackoff::new(Duration::from_millis(200), no_jitter());
        for _ in 0..6 {
            backoff.record_failure();
        }
        assert!(backoff.is_backing_off());

        backoff.record_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_wait(), Duration::from_millis(200));
    }

    #[test]
    fn base_above_ceiling_is_not_shrunk() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_millis(500),
            after_failures: 1,
            ..no_jitter()
        };
        let mut backoff = ChannelBackoff::new(Duration::from_secs(2), policy);
        backoff.record_failure();

        assert_eq!(backoff.current_delay(), Duration::from_secs(2));
    }
}
