//! `fetchbot serve` – long-running dispatcher fed by JSON lines.
//!
//! Each input line is one operation:
//! `{"op":"fetch","identity":"42","url":"https://...","quality":"720p","items":"1-5"}`
//! or `{"op":"cancel","identity":"42"}`. One JSON outcome line per job is printed
//! on stdout. End of input drains running jobs; Ctrl-C cancels them after
//! the configured grace period.

use anyhow::{Context, Result};
use fetchbot_core::pipeline::{Dispatcher, JobRequest};
use fetchbot_core::request::Identity;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use super::{parse_request, Runtime};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ServeLine {
    Fetch {
        identity: String,
        url: String,
        #[serde(default)]
        quality: Option<String>,
        #[serde(default)]
        items: Option<String>,
        /// Destination chat; defaults to the identity.
        #[serde(default)]
        destination: Option<String>,
    },
    Cancel {
        identity: String,
    },
}

pub async fn run_serve(runtime: &Runtime, input: Option<&Path>) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let dispatcher = Dispatcher::new(runtime.context()?);
    let mut lines = reader.lines();
    let mut outcomes: Vec<JoinHandle<()>> = Vec::new();
    tracing::info!(workers = runtime.config.max_workers, "serving requests");

    let interrupted = loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break true,
        };
        let Some(line) = line else {
            break false;
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ServeLine>(line) {
            Ok(op) => {
                if let Some(handle) = handle_line(&dispatcher, op).await {
                    outcomes.push(handle);
                }
            }
            Err(e) => tracing::warn!(line = %line, "ignoring malformed request: {}", e),
        }
    };

    let grace = if interrupted {
        tracing::info!("interrupted, shutting down");
        runtime.config.shutdown_grace()
    } else {
        // End of input: let running jobs finish within their own deadline.
        runtime.config.job_timeout()
    };
    let clean = dispatcher.shutdown(grace).await;
    for handle in outcomes {
        let _ = handle.await;
    }
    if !clean {
        anyhow::bail!("some jobs did not finish cleanup before exit");
    }
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, op: ServeLine) -> Option<JoinHandle<()>> {
    match op {
        ServeLine::Cancel { identity } => {
            let cancelled = dispatcher.cancel(&Identity::from(identity.as_str()));
            tracing::info!(identity = %identity, cancelled, "cancel requested");
            None
        }
        ServeLine::Fetch {
            identity: user,
            url,
            quality,
            items,
            destination,
        } => {
            let max_items = dispatcher.context().config.max_batch_items;
            let request = match parse_request(&url, quality.as_deref().unwrap_or("best"), items.as_deref(), max_items) {
                Ok(r) => r,
                Err(e) => {
                    print_outcome(json!({"identity": user, "url": url, "ok": false, "error": format!("{e:#}")}));
                    return None;
                }
            };
            let job = JobRequest {
                identity: Identity::from(user.as_str()),
                destination: destination.unwrap_or_else(|| user.clone()),
                request,
            };
            let ticket = match dispatcher.submit(job).await {
                Ok(ticket) => ticket,
                Err(e) => {
                    print_outcome(json!({"identity": user, "url": url, "ok": false, "error": e.to_string()}));
                    return None;
                }
            };
            Some(tokio::spawn(async move {
                let job_id = ticket.job_id;
                let line = match ticket.wait().await {
                    Ok(report) => json!({
                        "job_id": job_id,
                        "identity": user,
                        "ok": report.is_success(),
                        "delivered": report.delivered,
                        "from_cache": report.from_cache,
                        "failed": report.failed.iter().map(|f| f.index).collect::<Vec<_>>(),
                        "skipped": report.skipped,
                    }),
                    Err(e) => json!({
                        "job_id": job_id,
                        "identity": user,
                        "ok": false,
                        "class": e.class().as_str(),
                        "error": e.to_string(),
                    }),
                };
                print_outcome(line);
            }))
        }
    }
}

fn print_outcome(line: serde_json::Value) {
    println!("{line}");
}
