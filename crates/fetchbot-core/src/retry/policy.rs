use std::time::Duration;

use crate::channel::{ChannelError, ChannelErrorKind};
use crate::config::DeliveryConfig;

/// Classification of a channel failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Flood control, with the wait the channel asked for (if any).
    RateLimited(Option<Duration>),
    /// Anything else: surfaced immediately.
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay when the channel gives no wait.
    pub base_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }

    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Other => RetryDecision::NoRetry,
            ErrorKind::RateLimited(Some(wait)) => RetryDecision::RetryAfter(wait.min(self.max_delay)),
            ErrorKind::RateLimited(None) => {
                let exp = 1u32 << attempt.saturating_sub(1).min(8);
                RetryDecision::RetryAfter(self.base_delay.saturating_mul(exp).min(self.max_delay))
            }
        }
    }
}

pub fn classify(err: &ChannelError) -> ErrorKind {
    match err.kind {
        ChannelErrorKind::RateLimited { retry_after } => {
            ErrorKind::RateLimited(Some(retry_after).filter(|d| !d.is_zero()))
        }
        _ => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_for_other() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Other), RetryDecision::NoRetry);
        assert_eq!(classify(&ChannelError::not_found("gone")), ErrorKind::Other);
    }

    #[test]
    fn channel_wait_is_used_and_capped() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, ErrorKind::RateLimited(Some(Duration::from_secs(4)))),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
        assert_eq!(
            p.decide(1, ErrorKind::RateLimited(Some(Duration::from_secs(600)))),
            RetryDecision::RetryAfter(p.max_delay)
        );
        let kind = classify(&ChannelError::rate_limited(Duration::from_secs(7)));
        assert_eq!(kind, ErrorKind::RateLimited(Some(Duration::from_secs(7))));
    }

    #[test]
    fn exponential_backoff_without_hint() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 20;
        let d1 = match p.decide(1, ErrorKind::RateLimited(None)) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d2 = match p.decide(2, ErrorKind::RateLimited(None)) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d2 >= d1);
        match p.decide(15, ErrorKind::RateLimited(None)) {
            RetryDecision::RetryAfter(d) => assert!(d <= p.max_delay),
            _ => panic!("expected retry"),
        }
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        let kind = ErrorKind::RateLimited(Some(Duration::from_secs(1)));
        assert!(matches!(p.decide(1, kind), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, kind), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, kind), RetryDecision::NoRetry);
    }
}
