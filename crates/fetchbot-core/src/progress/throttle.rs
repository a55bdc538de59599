use std::time::Duration;
use tokio::time::Instant;

/// Outbound edit limiter: at most one edit per `min_interval`, plus a
/// channel-imposed quiet period after rate limiting.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
    not_before: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
            not_before: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        if self.not_before.is_some_and(|t| now < t) {
            return false;
        }
        match self.last {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Hold all edits until `now + wait`.
    pub fn back_off(&mut self, now: Instant, wait: Duration) {
        self.not_before = Some(now + wait);
    }
}
