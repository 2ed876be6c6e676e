//! Backoff schedule for transient capability failures.

use std::time::Duration;

/// How often, and after what pause, a failed branch is re-invoked.
///
/// `attempt` counts retries already made: `should_retry(0)` asks whether a first retry is
/// allowed after the initial failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Constant pause between retries.
    Fixed {
        max_attempts: usize,
        interval: Duration,
    },
    /// `initial * multiplier^attempt`, capped at `max_interval`.
    Exponential {
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            interval,
        }
    }

    pub fn exponential(
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    ) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_interval,
            max_interval,
            multiplier,
        }
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts()
    }

    /// Pause before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                multiplier,
                ..
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = initial_interval.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_interval.as_secs_f64() {
                    *max_interval
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }

    /// Retries allowed after the first failure.
    pub fn max_attempts(&self) -> usize {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_attempts, .. }
            | RetryPolicy::Exponential { max_attempts, .. } => *max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_retries() {
        assert!(!RetryPolicy::None.should_retry(0));
        assert_eq!(RetryPolicy::None.delay(3), Duration::ZERO);
    }

    #[test]
    fn fixed_retries_up_to_max_with_constant_pause() {
        let p = RetryPolicy::fixed(2, Duration::from_millis(50));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));
        assert_eq!(p.delay(1), Duration::from_millis(50));
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let p = RetryPolicy::exponential(
            6,
            Duration::from_millis(200),
            Duration::from_secs(1),
            2.0,
        );
        assert_eq!(p.delay(0), Duration::from_millis(200));
        assert_eq!(p.delay(1), Duration::from_millis(400));
        assert_eq!(p.delay(2), Duration::from_millis(800));
        assert_eq!(p.delay(3), Duration::from_secs(1));
        assert_eq!(p.delay(500), Duration::from_secs(1));
    }
}
