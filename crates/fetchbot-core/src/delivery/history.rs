//! Per-identity delivery history.
//!
//! Records live at `history/<identity>/<millis>-<fp prefix>-<index><origin>` so a
//! prefix read lists one identity's deliveries oldest first. A small profile
//! document at `users/<identity>` is upserted alongside each record.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::ArtifactRef;
use crate::request::{Identity, RequestFingerprint};
use crate::store::{doc_path, DocumentStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub identity: String,
    pub source_url: String,
    pub fingerprint: RequestFingerprint,
    pub index: u32,
    pub quality: String,
    pub title: String,
    pub artifact: ArtifactRef,
    /// Milliseconds since the Unix epoch.
    pub delivered_at: u64,
    /// Served from cache rather than freshly downloaded.
    #[serde(default)]
    pub from_cache: bool,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct HistoryLog {
    store: Arc<dyn DocumentStore>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, record: &HistoryRecord) -> Result<()> {
        let key = format!(
            "{:013}-{}-{}{}",
            record.delivered_at,
            record.fingerprint.short(),
            record.index,
            if record.from_cache { "c" } else { "d" }
        );
        let path = doc_path(&["history", &record.identity, &key]);
        let doc = serde_json::to_value(record).context("serialize history record")?;
        self.store.set(&path, &doc).await?;

        let profile = json!({
            "identity": record.identity,
            "last_delivery_at": record.delivered_at,
            "last_title": record.title,
        });
        self.store
            .update(&doc_path(&["users", &record.identity]), &profile)
            .await?;
        Ok(())
    }

    /// Most recent `limit` records for `identity`, newest first.
    pub async fn list(&self, identity: &Identity, limit: usize) -> Result<Vec<HistoryRecord>> {
        let prefix = format!("{}/", doc_path(&["history", identity.as_str()]));
        let mut records = Vec::new();
        for (path, doc) in self.store.list_prefix(&prefix).await?.into_iter().rev() {
            if records.len() >= limit {
                break;
            }
            match serde_json::from_value::<HistoryRecord>(doc) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(path = %path, "ignoring malformed history record: {}", e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageRef;
    use crate::request::QualityKey;
    use crate::store::MemoryStore;

    fn record(identity: &str, at: u64, index: u32) -> HistoryRecord {
        HistoryRecord {
            identity: identity.to_string(),
            source_url: "https://www.youtube.com/watch?v=abc".to_string(),
            fingerprint: RequestFingerprint::derive("https://www.youtube.com/watch?v=abc", QualityKey::Best),
            index,
            quality: "best".to_string(),
            title: format!("clip {index}"),
            artifact: ArtifactRef::new(vec![MessageRef {
                chat: "audit".to_string(),
                message_id: index as i64,
            }]),
            delivered_at: at,
            from_cache: false,
        }
    }

    #[tokio::test]
    async fn lists_newest_first_per_identity() {
        let store = Arc::new(MemoryStore::new());
        let log = HistoryLog::new(store.clone());
        log.record(&record("7", 1_000, 1)).await.unwrap();
        log.record(&record("7", 2_000, 2)).await.unwrap();
        log.record(&record("8", 3_000, 1)).await.unwrap();

        let got = log.list(&Identity::from("7"), 10).await.unwrap();
        assert_eq!(got.iter().map(|r| r.index).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(log.list(&Identity::from("7"), 1).await.unwrap().len(), 1);

        let profile = store.get("users/7").await.unwrap().unwrap();
        assert_eq!(profile["last_title"], "clip 2");
    }
}
