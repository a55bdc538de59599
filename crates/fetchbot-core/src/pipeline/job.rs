//! One job end to end: cache lookup, preflight, then fetch, normalize and
//! deliver every missing item.
//!
//! Items are independent: a failed item is reported on its own and the batch
//! moves on, unless the failure means later items cannot succeed either.

use crate::admission::JobId;
use crate::channel::Payload;
use crate::delivery::{DeliveryError, DeliveryTarget};
use crate::error::JobError;
use crate::extract::{AttemptSequencer, ExtractRequest};
use crate::progress::{Phase, ProgressState};
use crate::request::{Identity, RequestSpec};
use crate::workspace::{ensure_free_space, JobWorkspace};

use super::FetchContext;

/// Inputs of one running job.
pub struct JobScope<'a> {
    pub job_id: JobId,
    pub identity: &'a Identity,
    pub destination: &'a str,
    pub request: &'a RequestSpec,
    pub workspace: &'a JobWorkspace,
    pub progress: &'a ProgressState,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub index: u32,
    pub error: JobError,
}

#[derive(Debug, Default)]
pub struct JobReport {
    /// Freshly downloaded and delivered.
    pub delivered: Vec<u32>,
    /// Forwarded from earlier deliveries.
    pub from_cache: Vec<u32>,
    pub failed: Vec<ItemFailure>,
    /// Not attempted because an earlier failure stopped the batch.
    pub skipped: Vec<u32>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.len() + self.from_cache.len()
    }

    /// Final status text.
    pub fn summary(&self) -> String {
        let total = self.delivered_count() + self.failed.len() + self.skipped.len();
        if total <= 1 && self.is_success() {
            return if self.from_cache.is_empty() {
                "✅ Done".to_string()
            } else {
                "✅ Sent from cache".to_string()
            };
        }
        let mut text = format!(
            "{} {} of {} items delivered ({} from cache)",
            if self.is_success() { "✅" } else { "⚠️" },
            self.delivered_count(),
            total,
            self.from_cache.len()
        );
        if !self.failed.is_empty() {
            let failed: Vec<String> = self.failed.iter().map(|f| f.index.to_string()).collect();
            text.push_str(&format!("\nFailed: {}", failed.join(", ")));
        }
        if !self.skipped.is_empty() {
            text.push_str(&format!("\nSkipped: {}", self.skipped.len()));
        }
        text
    }
}

/// Run the pipeline for one admitted job. Single-item jobs return their
/// item's error directly; batches collect per-item failures in the report.
pub async fn run_job(ctx: &FetchContext, scope: &JobScope<'_>) -> Result<JobReport, JobError> {
    let request = scope.request;
    let fp = request.fingerprint();
    let batch = request.range.is_batch();
    let item_count = request.range.len() as u32;

    let lookup = ctx.cache.lookup(&fp, &request.range).await;
    let mut misses = lookup.misses;
    tracing::info!(
        job_id = scope.job_id,
        identity = %scope.identity,
        fingerprint = fp.short(),
        hits = lookup.hits.len(),
        misses = misses.len(),
        "job started"
    );

    if !misses.is_empty() {
        ensure_free_space(scope.workspace.path(), ctx.config.min_free_bytes)?;
    }

    let mut report = JobReport::default();

    for (index, entry) in &lookup.hits {
        let index = *index;
        let dest = target(scope, index, batch.then_some(item_count));
        match ctx.deliverer.redeliver(entry, dest).await {
            Ok(_) => report.from_cache.push(index),
            Err(DeliveryError::Gone(msg)) => {
                tracing::info!(job_id = scope.job_id, index, message = %msg, "cached copy is gone, fetching again");
                if let Err(e) = ctx.cache.invalidate(&fp, Some(index)).await {
                    tracing::warn!(job_id = scope.job_id, index, "could not invalidate dead cache entry: {:#}", e);
                }
                misses.push(index);
            }
            Err(e) => fail_item(ctx, scope, &mut report, index, e.into()).await,
        }
    }
    misses.sort_unstable();

    let count = misses.len() as u32;
    for (pos, &index) in misses.iter().enumerate() {
        scope.progress.begin_item(index, pos as u32 + 1, count);
        let result = fetch_item(ctx, scope, index, batch.then_some(item_count)).await;
        scope.workspace.remove_item_dir(index).await;
        match result {
            Ok(()) => {
                tracing::info!(job_id = scope.job_id, index, "item delivered");
                report.delivered.push(index);
            }
            Err(error) => {
                let stop = error.stops_batch();
                fail_item(ctx, scope, &mut report, index, error).await;
                if stop {
                    report.skipped = misses[pos + 1..].to_vec();
                    if !report.skipped.is_empty() {
                        tracing::info!(job_id = scope.job_id, index, skipped = report.skipped.len(), "batch stopped");
                    }
                    break;
                }
            }
        }
    }
    scope.progress.set_phase(Phase::Done);

    if !batch {
        if let Some(failure) = report.failed.pop() {
            return Err(failure.error);
        }
    }
    Ok(report)
}

fn target<'a>(scope: &'a JobScope<'_>, index: u32, item_count: Option<u32>) -> DeliveryTarget<'a> {
    DeliveryTarget {
        identity: scope.identity,
        destination: scope.destination,
        request: scope.request,
        index,
        item_count,
    }
}

async fn fetch_item(ctx: &FetchContext, scope: &JobScope<'_>, index: u32, item_count: Option<u32>) -> Result<(), JobError> {
    let work_dir = scope
        .workspace
        .item_dir(index)
        .await
        .map_err(|e| anyhow::Error::new(e).context("create item directory"))?;
    let extract = ExtractRequest {
        url: scope.request.normalized_url.clone(),
        item: scope.request.range.playlist_item(index),
        quality: scope.request.quality,
        work_dir,
    };

    let mut sequencer = AttemptSequencer::new(ctx.engine.as_ref());
    let resolved = sequencer.resolve(&extract, &ctx.attempts, scope.progress).await?;
    tracing::debug!(job_id = scope.job_id, index, attempt = resolved.attempt, label = %resolved.label, "extracted");

    scope.progress.set_phase(Phase::Processing);
    let hint = resolved.output.info.duration_secs;
    let artifact = ctx.postprocessor.normalize(resolved.output, hint).await?;

    scope.progress.set_phase(Phase::Uploading);
    let delivered = ctx.deliverer.deliver(&artifact, target(scope, index, item_count)).await;
    artifact.remove_files().await;
    delivered?;
    Ok(())
}

/// Record the failure; batches also get a per-item message so siblings can carry on.
async fn fail_item(ctx: &FetchContext, scope: &JobScope<'_>, report: &mut JobReport, index: u32, error: JobError) {
    tracing::warn!(
        job_id = scope.job_id,
        index,
        class = error.class().as_str(),
        "item failed: {}",
        error
    );
    if scope.request.range.is_batch() {
        let text = format!("Item {index} failed: {}", error.user_message());
        if let Err(e) = ctx.channel.send(scope.destination, Payload::Text(text)).await {
            tracing::debug!(job_id = scope.job_id, index, "could not send failure notice: {}", e);
        }
    }
    report.failed.push(ItemFailure { index, error });
}
