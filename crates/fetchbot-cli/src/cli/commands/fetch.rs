//! `fetchbot fetch <url>` – run one request in the foreground.

use anyhow::Result;
use fetchbot_core::pipeline::{Dispatcher, JobRequest};
use fetchbot_core::request::{Identity, RequestSpec};

use super::Runtime;

pub async fn run_fetch(runtime: &Runtime, request: RequestSpec, identity: &str, destination: Option<&str>) -> Result<()> {
    let dispatcher = Dispatcher::new(runtime.context()?);
    let ticket = dispatcher
        .submit(JobRequest {
            identity: Identity::from(identity),
            destination: destination.unwrap_or(identity).to_string(),
            request,
        })
        .await?;
    let identity = ticket.identity.clone();

    let outcome = tokio::select! {
        outcome = ticket.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelling...");
            dispatcher.cancel(&identity);
            let clean = dispatcher.shutdown(runtime.config.shutdown_grace()).await;
            return Err(interrupted_error(clean));
        }
    };

    match outcome {
        Ok(report) => {
            println!("{}", report.summary());
            for failure in &report.failed {
                println!("  item {}: {}", failure.index, failure.error);
            }
            Ok(())
        }
        Err(e) => {
            println!("{}", e.user_message());
            Err(anyhow::Error::new(e).context("fetch failed"))
        }
    }
}

/// Error returned when the user interrupts a foreground fetch.
fn interrupted_error(clean: bool) -> anyhow::Error {
    if clean {
        anyhow::anyhow!("fetch interrupted")
    } else {
        anyhow::anyhow!("fetch interrupted; cleanup did not finish before exit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interruption_is_reported_as_failure() {
        assert_eq!(interrupted_error(true).to_string(), "fetch interrupted");
        assert!(interrupted_error(false).to_string().contains("cleanup did not finish"));
    }
}
