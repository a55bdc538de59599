//! Shipping artifacts to the requester, mirroring to the audit chat, and
//! recording what was delivered.
//!
//! Order on success: user copy, audit mirror, history record, cache entry.
//! Only channel rate limiting is retried; everything else surfaces at once.

mod history;

pub use history::{now_millis, HistoryLog, HistoryRecord};

use std::sync::Arc;

use crate::cache::{ArtifactRef, CacheEntry, CacheMetadata, FingerprintCache};
use crate::channel::{ChannelError, ChannelErrorKind, DeliveryChannel, MediaPayload, MessageRef, Payload};
use crate::media::Artifact;
use crate::request::{Identity, RequestSpec};
use crate::retry::{run_with_retry, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("still rate limited after {attempts} attempts: {source}")]
    RateLimited {
        attempts: u32,
        #[source]
        source: ChannelError,
    },
    #[error("part {part}/{total} rejected: {source}")]
    Rejected {
        part: usize,
        total: usize,
        #[source]
        source: ChannelError,
    },
    #[error("cached message {0} no longer exists")]
    Gone(MessageRef),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::RateLimited { .. })
    }

    fn from_channel(source: ChannelError, part: usize, total: usize, policy: &RetryPolicy) -> Self {
        match source.kind {
            ChannelErrorKind::RateLimited { .. } => DeliveryError::RateLimited {
                attempts: policy.max_attempts,
                source,
            },
            _ => DeliveryError::Rejected { part, total, source },
        }
    }
}

/// Who gets one item and how it is keyed.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryTarget<'a> {
    pub identity: &'a Identity,
    pub destination: &'a str,
    pub request: &'a RequestSpec,
    pub index: u32,
    /// Items in the batch, for cache metadata.
    pub item_count: Option<u32>,
}

pub struct Deliverer {
    channel: Arc<dyn DeliveryChannel>,
    audit_destination: Option<String>,
    history: HistoryLog,
    cache: Arc<FingerprintCache>,
    retry: RetryPolicy,
}

fn caption(title: &str, part: usize, total: usize) -> String {
    if total > 1 {
        format!("{title} - Part {part}/{total}")
    } else {
        title.to_string()
    }
}

impl Deliverer {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        audit_destination: Option<String>,
        history: HistoryLog,
        cache: Arc<FingerprintCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            audit_destination,
            history,
            cache,
            retry,
        }
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Upload every part in order, then mirror, record history and store the cache entry.
    pub async fn deliver(&self, artifact: &Artifact, target: DeliveryTarget<'_>) -> Result<ArtifactRef, DeliveryError> {
        let total = artifact.parts.len();
        let mut sent: Vec<MessageRef> = Vec::with_capacity(total);

        for (i, part) in artifact.parts.iter().enumerate() {
            let payload = MediaPayload {
                path: part.path.clone(),
                caption: caption(&artifact.title, i + 1, total),
                duration_secs: part.duration_secs,
                width: artifact.width,
                height: artifact.height,
                thumbnail: part.thumbnail.path().map(|p| p.to_path_buf()),
            };
            let result = run_with_retry(&self.retry, || {
                self.channel
                    .send(target.destination, Payload::Media(payload.clone()))
            })
            .await;
            match result {
                Ok(msg) => {
                    tracing::debug!(index = target.index, part = i + 1, total, message = %msg, "part sent");
                    sent.push(msg);
                }
                Err(e) => {
                    tracing::warn!(index = target.index, part = i + 1, total, "upload failed: {}", e);
                    self.retract(&sent).await;
                    return Err(DeliveryError::from_channel(e, i + 1, total, &self.retry));
                }
            }
        }

        let mirrored = self.mirror(&sent).await;
        let artifact_ref = ArtifactRef::new(mirrored.unwrap_or(sent));
        let entry = CacheEntry {
            artifact: artifact_ref.clone(),
            meta: CacheMetadata {
                title: Some(artifact.title.clone()),
                duration_secs: artifact.duration_secs,
                size_bytes: artifact.size_bytes,
                item_count: target.item_count,
            },
        };
        self.record(&target, &artifact.title, &artifact_ref, false).await;
        self.cache.store(&target.request.fingerprint(), target.index, &entry).await;
        Ok(artifact_ref)
    }

    /// Forward a cached item to the requester. A vanished source message is `Gone`.
    pub async fn redeliver(&self, entry: &CacheEntry, target: DeliveryTarget<'_>) -> Result<ArtifactRef, DeliveryError> {
        let total = entry.artifact.parts.len();
        let mut sent = Vec::with_capacity(total);
        for (i, source) in entry.artifact.parts.iter().enumerate() {
            let result = run_with_retry(&self.retry, || self.channel.forward(source, target.destination)).await;
            match result {
                Ok(msg) => sent.push(msg),
                Err(e) => {
                    self.retract(&sent).await;
                    if e.kind == ChannelErrorKind::NotFound {
                        return Err(DeliveryError::Gone(source.clone()));
                    }
                    return Err(DeliveryError::from_channel(e, i + 1, total, &self.retry));
                }
            }
        }
        let title = entry.meta.title.clone().unwrap_or_default();
        self.record(&target, &title, &entry.artifact, true).await;
        Ok(ArtifactRef::new(sent))
    }

    /// Copy delivered parts to the audit chat. `None` unless every part was mirrored.
    async fn mirror(&self, sent: &[MessageRef]) -> Option<Vec<MessageRef>> {
        let audit = self.audit_destination.as_deref()?;
        let mut copies = Vec::with_capacity(sent.len());
        for msg in sent {
            match run_with_retry(&self.retry, || self.channel.forward(msg, audit)).await {
                Ok(copy) => copies.push(copy),
                Err(e) => {
                    tracing::warn!(message = %msg, audit, "audit mirror failed: {}", e);
                    return None;
                }
            }
        }
        Some(copies)
    }

    async fn retract(&self, sent: &[MessageRef]) {
        for msg in sent {
            if let Err(e) = self.channel.delete(msg).await {
                tracing::debug!(message = %msg, "could not delete partial delivery: {}", e);
            }
        }
    }

    async fn record(&self, target: &DeliveryTarget<'_>, title: &str, artifact: &ArtifactRef, from_cache: bool) {
        let record = HistoryRecord {
            identity: target.identity.as_str().to_string(),
            source_url: target.request.source_url.clone(),
            fingerprint: target.request.fingerprint(),
            index: target.index,
            quality: target.request.quality.to_string(),
            title: title.to_string(),
            artifact: artifact.clone(),
            delivered_at: now_millis(),
            from_cache,
        };
        if let Err(e) = self.history.record(&record).await {
            tracing::warn!(identity = %target.identity, index = target.index, "history write failed: {:#}", e);
        }
    }
}
