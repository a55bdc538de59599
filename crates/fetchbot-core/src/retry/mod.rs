//! Retry and backoff policy for delivery-channel calls.
//!
//! Only channel rate limiting is retried. The channel's own `retry_after`
//! wins over computed backoff; every wait is capped.

mod policy;
mod run;

pub use policy::{classify, ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
