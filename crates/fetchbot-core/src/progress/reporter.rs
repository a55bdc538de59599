//! Background task that mirrors `ProgressState` into a status message.
//!
//! The task samples counters on a fixed tick, renders, and edits the status
//! message at most once per minimum interval. It stops for good when the
//! channel says the message is gone. `finish` pushes one final text past the
//! throttle; `stop` returns within one tick even if an edit is stuck.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::render::render;
use super::state::{Phase, ProgressState};
use super::throttle::Throttle;
use crate::admission::JobId;
use crate::channel::{ChannelErrorKind, DeliveryChannel, MessageRef};
use crate::config::ProgressConfig;

/// Upper bound on the final edit.
const FINAL_EDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where status text goes: one message, edited in place.
#[derive(Clone)]
pub struct StatusSink {
    pub channel: Arc<dyn DeliveryChannel>,
    pub message: MessageRef,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    /// Periodic edits the channel accepted.
    pub edits: u64,
    pub final_sent: bool,
    /// The status message disappeared; the reporter stopped early.
    pub target_gone: bool,
    /// Too many consecutive failures; periodic edits were abandoned.
    pub gave_up: bool,
}

pub struct ReporterHandle {
    cancel: CancellationToken,
    final_tx: Option<oneshot::Sender<String>>,
    task: Option<JoinHandle<ReporterStats>>,
    interval: Duration,
}

pub struct ProgressReporter;

impl ProgressReporter {
    /// Spawn the reporter for `job_id`. Must be called inside a tokio runtime.
    pub fn start(
        job_id: JobId,
        state: Arc<ProgressState>,
        sink: StatusSink,
        cfg: &ProgressConfig,
    ) -> ReporterHandle {
        let cancel = CancellationToken::new();
        let (final_tx, final_rx) = oneshot::channel();
        let task = tokio::spawn(run_reporter(
            job_id,
            state,
            sink,
            cfg.clone(),
            cancel.clone(),
            final_rx,
        ));
        ReporterHandle {
            cancel,
            final_tx: Some(final_tx),
            task: Some(task),
            interval: cfg.tick(),
        }
    }
}

impl ReporterHandle {
    /// Send `text` unconditionally (unless the message is gone), then stop.
    pub async fn finish(mut self, text: impl Into<String>) -> ReporterStats {
        if let Some(tx) = self.final_tx.take() {
            let _ = tx.send(text.into());
        }
        self.cancel.cancel();
        self.join(FINAL_EDIT_TIMEOUT + self.interval).await
    }

    /// Stop without a final update.
    pub async fn stop(mut self) -> ReporterStats {
        self.final_tx.take();
        self.cancel.cancel();
        self.join(self.interval).await
    }

    async fn join(&mut self, wait: Duration) -> ReporterStats {
        let Some(mut task) = self.task.take() else {
            return ReporterStats::default();
        };
        match tokio::time::timeout(wait, &mut task).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                tracing::warn!("progress reporter task failed: {}", e);
                ReporterStats::default()
            }
            Err(_) => {
                task.abort();
                tracing::debug!("progress reporter did not stop in time, aborted");
                ReporterStats::default()
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_reporter(
    job_id: JobId,
    state: Arc<ProgressState>,
    sink: StatusSink,
    cfg: ProgressConfig,
    cancel: CancellationToken,
    mut final_rx: oneshot::Receiver<String>,
) -> ReporterStats {
    let mut ticker = tokio::time::interval(cfg.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut throttle = Throttle::new(cfg.min_edit_interval());
    let mut stats = ReporterStats::default();
    let mut last_text: Option<String> = None;
    let mut frame = 0usize;
    let mut frame_at = Instant::now();
    let mut failures = 0u32;

    loop {
        tokio::select! {
            biased;
            text = &mut final_rx => {
                if let Ok(text) = text {
                    stats.final_sent = send_final(job_id, &sink, &text).await;
                }
                break;
            }
            _ = cancel.cancelled() => break,
            _ = ticker.tick(), if !stats.gave_up => {
                let now = Instant::now();
                let snapshot = state.snapshot();
                if snapshot.phase != Phase::Downloading && now.duration_since(frame_at) >= cfg.idle_tick() {
                    frame += 1;
                    frame_at = now;
                }
                let text = render(&snapshot, frame);
                if last_text.as_deref() == Some(text.as_str()) || !throttle.ready(now) {
                    continue;
                }
                let outcome = tokio::select! {
                    r = sink.channel.edit(&sink.message, &text) => Some(r),
                    _ = cancel.cancelled() => None,
                };
                match outcome {
                    None => continue,
                    Some(Ok(())) => {
                        throttle.record(now);
                        last_text = Some(text);
                        stats.edits += 1;
                        failures = 0;
                    }
                    Some(Err(e)) => match e.kind {
                        ChannelErrorKind::NotFound => {
                            tracing::debug!(job_id, "status message gone, reporter stopping");
                            stats.target_gone = true;
                            break;
                        }
                        ChannelErrorKind::RateLimited { retry_after } => {
                            tracing::debug!(job_id, retry_after_ms = retry_after.as_millis() as u64, "status edit rate limited");
                            throttle.back_off(now, retry_after);
                        }
                        ChannelErrorKind::NotModified => {
                            throttle.record(now);
                            last_text = Some(text);
                        }
                        ChannelErrorKind::Other => {
                            failures += 1;
                            throttle.record(now);
                            tracing::warn!(job_id, failures, "status edit failed: {}", e);
                            if failures >= cfg.max_edit_failures.max(1) {
                                stats.gave_up = true;
                            }
                        }
                    },
                }
            }
        }
    }
    stats
}

async fn send_final(job_id: JobId, sink: &StatusSink, text: &str) -> bool {
    match tokio::time::timeout(FINAL_EDIT_TIMEOUT, sink.channel.edit(&sink.message, text)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) if e.kind == ChannelErrorKind::NotModified => true,
        Ok(Err(e)) => {
            tracing::debug!(job_id, "final status edit failed: {}", e);
            false
        }
        Err(_) => {
            tracing::debug!(job_id, "final status edit timed out");
            false
        }
    }
}
