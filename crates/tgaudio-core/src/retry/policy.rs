use rand::Rng;
use std::time::Duration;

use crate::error::FailureKind;

/// Decision returned by [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop; the task should transition to FAILED.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy: `base * 2^(attempt-1)`, capped at `max_delay`,
/// jittered by ±25% so concurrent retries don't all land in the same
/// instant.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_secs_f64(cfg.retry_base_delay_seconds),
            max_delay: Duration::from_secs_f64(cfg.retry_max_delay_seconds),
        }
    }

    /// `attempt` is 1-based (1 = first attempt that just failed).
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        if !kind.is_retriable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }

        let exp = 1u32 << attempt.saturating_sub(1).min(10);
        let raw = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(jitter(raw))
    }
}

/// Applies ±25% jitter to `delay`.
fn jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.75..=1.25);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retriable_kind_never_retries() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, FailureKind::Integrity), RetryDecision::NoRetry);
        assert_eq!(p.decide(1, FailureKind::Auth), RetryDecision::NoRetry);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let p = RetryPolicy {
            max_attempts: 20,
            ..RetryPolicy::default()
        };
        let d1 = match p.decide(1, FailureKind::Transient) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d_last = match p.decide(10, FailureKind::Transient) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d1 <= Duration::from_secs(2));
        assert!(d_last <= p.max_delay + Duration::from_secs(1));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            p.decide(1, FailureKind::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            p.decide(2, FailureKind::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, FailureKind::Transient), RetryDecision::NoRetry);
    }
}
