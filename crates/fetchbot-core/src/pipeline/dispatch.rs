//! Job dispatcher: admission, worker capacity, per-job deadline, shutdown.
//!
//! Every job leaves through the same exit sequence, whatever ended it:
//! the pipeline future is dropped (which kills child processes), the
//! workspace is removed, the admission slot is released, and finally the
//! progress reporter is finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::admission::{AdmissionSlot, JobId, JobState};
use crate::channel::Payload;
use crate::error::JobError;
use crate::progress::{ProgressReporter, ProgressState, ReporterHandle, StatusSink};
use crate::request::{Identity, RequestSpec};
use crate::workspace::JobWorkspace;

use super::job::{run_job, JobReport, JobScope};
use super::FetchContext;

/// How long shutdown waits for cancelled jobs to finish their cleanup.
const CLEANUP_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub identity: Identity,
    /// Chat that receives status updates and artifacts.
    pub destination: String,
    pub request: RequestSpec,
}

/// Handle to a submitted job.
pub struct JobTicket {
    pub job_id: JobId,
    pub identity: Identity,
    outcome: oneshot::Receiver<Result<JobReport, JobError>>,
}

impl JobTicket {
    /// Wait for the job's exit sequence to complete.
    pub async fn wait(self) -> Result<JobReport, JobError> {
        self.outcome.await.unwrap_or(Err(JobError::Cancelled))
    }
}

pub struct Dispatcher {
    ctx: Arc<FetchContext>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    closing: CancellationToken,
}

impl Dispatcher {
    pub fn new(ctx: Arc<FetchContext>) -> Self {
        let workers = Arc::new(Semaphore::new(ctx.config.max_workers.max(1)));
        Self {
            ctx,
            workers,
            tracker: TaskTracker::new(),
            closing: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Arc<FetchContext> {
        &self.ctx
    }

    /// Admit and start a job. Rejection is immediate and tells the requester why.
    pub async fn submit(&self, job: JobRequest) -> Result<JobTicket, JobError> {
        if self.closing.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if let Err(e) = job.request.range.check_limit(self.ctx.config.max_batch_items) {
            let err = JobError::InvalidRequest(e);
            self.notify_rejected(&job, &err).await;
            return Err(err);
        }
        let Some(slot) = self
            .ctx
            .admission
            .try_acquire(job.identity.clone(), job.request.clone())
        else {
            let err = JobError::AdmissionRejected(job.identity.clone());
            self.notify_rejected(&job, &err).await;
            return Err(err);
        };

        let job_id = slot.job_id();
        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let workers = self.workers.clone();
        tracing::info!(job_id, identity = %job.identity, url = %job.request.normalized_url, range = %job.request.range, "job submitted");
        let identity = job.identity.clone();
        self.tracker.spawn(async move {
            let outcome = supervise(ctx, workers, slot, job).await;
            let _ = tx.send(outcome);
        });
        Ok(JobTicket {
            job_id,
            identity,
            outcome: rx,
        })
    }

    async fn notify_rejected(&self, job: &JobRequest, err: &JobError) {
        tracing::info!(identity = %job.identity, "job rejected: {}", err);
        if let Err(e) = self
            .ctx
            .channel
            .send(&job.destination, Payload::Text(err.user_message()))
            .await
        {
            tracing::debug!(identity = %job.identity, "could not send rejection notice: {}", e);
        }
    }

    /// Cancel the identity's running or pending job.
    pub fn cancel(&self, identity: &Identity) -> bool {
        self.ctx.admission.cancel(identity)
    }

    pub fn active_count(&self) -> usize {
        self.ctx.admission.active_count()
    }

    /// Stop accepting jobs, wait up to `grace` for running ones, then cancel
    /// the rest and wait for their cleanup. Returns true when every job exited.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closing.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("all jobs finished");
            return true;
        }
        let cancelled = self.ctx.admission.cancel_all();
        tracing::warn!(cancelled, "grace period over, cancelling remaining jobs");
        let done = tokio::time::timeout(CLEANUP_WINDOW, self.tracker.wait()).await.is_ok();
        if !done {
            tracing::error!("jobs still running after cleanup window");
        }
        done
    }
}

/// Wait for capacity, run the pipeline, then run the exit sequence.
async fn supervise(
    ctx: Arc<FetchContext>,
    workers: Arc<Semaphore>,
    slot: AdmissionSlot,
    job: JobRequest,
) -> Result<JobReport, JobError> {
    let job_id = slot.job_id();
    let cancel = slot.cancel_token().clone();
    let progress = Arc::new(ProgressState::new());
    let reporter = start_reporter(&ctx, job_id, &job.destination, progress.clone()).await;

    let permit: Option<OwnedSemaphorePermit> = tokio::select! {
        permit = workers.acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => None,
    };
    let outcome = match permit {
        Some(permit) => {
            slot.set_state(JobState::Running);
            let outcome = execute(&ctx, job_id, &job, &progress, &cancel).await;
            drop(permit);
            outcome
        }
        None => Err(JobError::Cancelled),
    };

    slot.set_state(if outcome.is_ok() {
        JobState::Completed
    } else {
        JobState::Failed
    });
    slot.release();

    let text = match &outcome {
        Ok(report) => report.summary(),
        Err(e) => e.user_message(),
    };
    finish(&ctx, job_id, &job.destination, reporter, text, outcome.is_err()).await;

    match &outcome {
        Ok(report) => tracing::info!(
            job_id,
            delivered = report.delivered.len(),
            from_cache = report.from_cache.len(),
            failed = report.failed.len(),
            "job completed"
        ),
        Err(e) => tracing::warn!(job_id, class = e.class().as_str(), "job failed: {}", e),
    }
    outcome
}

/// Run the pipeline against cancellation and the deadline, then remove the workspace.
async fn execute(
    ctx: &FetchContext,
    job_id: JobId,
    job: &JobRequest,
    progress: &ProgressState,
    cancel: &CancellationToken,
) -> Result<JobReport, JobError> {
    let mut workspace = JobWorkspace::create(&ctx.work_root, job_id)
        .map_err(|e| anyhow::Error::new(e).context("create job workspace"))?;
    let timeout = ctx.config.job_timeout();

    let outcome = {
        let scope = JobScope {
            job_id,
            identity: &job.identity,
            destination: &job.destination,
            request: &job.request,
            workspace: &workspace,
            progress,
        };
        tokio::select! {
            result = run_job(ctx, &scope) => result,
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(JobError::TimedOut(timeout)),
        }
    };

    if let Err(e) = workspace.cleanup() {
        tracing::warn!(job_id, path = %workspace.path().display(), "workspace cleanup failed: {}", e);
    }
    outcome
}

async fn start_reporter(
    ctx: &FetchContext,
    job_id: JobId,
    destination: &str,
    progress: Arc<ProgressState>,
) -> Option<ReporterHandle> {
    match ctx
        .channel
        .send(destination, Payload::Text("⏳ Waiting...".to_string()))
        .await
    {
        Ok(message) => {
            let sink = StatusSink {
                channel: ctx.channel.clone(),
                message,
            };
            Some(ProgressReporter::start(
                job_id,
                progress,
                sink,
                &ctx.config.progress_or_default(),
            ))
        }
        Err(e) => {
            tracing::warn!(job_id, "could not create status message, no progress updates: {}", e);
            None
        }
    }
}

/// Push the final status. A failure whose status message is gone gets a fresh message.
async fn finish(
    ctx: &FetchContext,
    job_id: JobId,
    destination: &str,
    reporter: Option<ReporterHandle>,
    text: String,
    failed: bool,
) {
    let sent = match reporter {
        Some(handle) => handle.finish(text.clone()).await.final_sent,
        None => false,
    };
    if !sent && failed {
        if let Err(e) = ctx.channel.send(destination, Payload::Text(text)).await {
            tracing::warn!(job_id, "could not send failure message: {}", e);
        }
    }
}
