//! Fingerprint cache: which items of a request were already delivered.
//!
//! One document per (fingerprint, item index) at `cache/<fp>/<index>`, so
//! writers for different items never touch the same record and a batch
//! lookup is a single prefix read. The cache is an optimization: lookups
//! degrade to "all miss" and store failures are logged, never returned.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::channel::MessageRef;
use crate::request::{ItemRange, RequestFingerprint};
use crate::store::{doc_path, DocumentStore};

const ROOT: &str = "cache";

/// Handles to already-delivered content, one per part, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub parts: Vec<MessageRef>,
}

impl ArtifactRef {
    pub fn new(parts: Vec<MessageRef>) -> Self {
        Self { parts }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub size_bytes: u64,
    /// Items in the batch this entry belongs to, when known.
    #[serde(default)]
    pub item_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub artifact: ArtifactRef,
    pub meta: CacheMetadata,
}

/// Result of a range lookup: every requested index is in exactly one of the two sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialHit {
    pub hits: BTreeMap<u32, CacheEntry>,
    pub misses: Vec<u32>,
}

impl PartialHit {
    fn all_miss(indices: Vec<u32>) -> Self {
        Self {
            hits: BTreeMap::new(),
            misses: indices,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.misses.is_empty()
    }
}

pub struct FingerprintCache {
    store: Arc<dyn DocumentStore>,
}

fn entry_path(fp: &RequestFingerprint, index: u32) -> String {
    doc_path(&[ROOT, fp.as_str(), &index.to_string()])
}

impl FingerprintCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, fp: &RequestFingerprint, range: &ItemRange) -> PartialHit {
        let wanted = range.indices();
        let found = match self.fetch(fp, &wanted).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(fingerprint = fp.short(), "cache lookup failed, treating as miss: {:#}", e);
                return PartialHit::all_miss(wanted);
            }
        };

        let mut result = PartialHit::default();
        for index in wanted {
            match found.get(&index) {
                Some(entry) => {
                    result.hits.insert(index, entry.clone());
                }
                None => result.misses.push(index),
            }
        }
        tracing::debug!(
            fingerprint = fp.short(),
            hits = result.hits.len(),
            misses = result.misses.len(),
            "cache lookup"
        );
        result
    }

    async fn fetch(&self, fp: &RequestFingerprint, wanted: &[u32]) -> Result<HashMap<u32, CacheEntry>> {
        let mut found = HashMap::new();
        if let [index] = wanted {
            if let Some(doc) = self.store.get(&entry_path(fp, *index)).await? {
                if let Some(entry) = decode(fp, *index, doc) {
                    found.insert(*index, entry);
                }
            }
            return Ok(found);
        }

        let prefix = format!("{}/", doc_path(&[ROOT, fp.as_str()]));
        for (path, doc) in self.store.list_prefix(&prefix).await? {
            let Some(index) = path.rsplit('/').next().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if !wanted.contains(&index) {
                continue;
            }
            if let Some(entry) = decode(fp, index, doc) {
                found.insert(index, entry);
            }
        }
        Ok(found)
    }

    /// Record a delivered item. Overwrites any previous entry for the same index.
    pub async fn store(&self, fp: &RequestFingerprint, index: u32, entry: &CacheEntry) -> bool {
        let doc = match serde_json::to_value(entry) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(fingerprint = fp.short(), index, "cache entry not serializable: {}", e);
                return false;
            }
        };
        match self.store.set(&entry_path(fp, index), &doc).await {
            Ok(()) => {
                tracing::debug!(fingerprint = fp.short(), index, "cache stored");
                true
            }
            Err(e) => {
                tracing::warn!(fingerprint = fp.short(), index, "cache store failed: {:#}", e);
                false
            }
        }
    }

    /// Forget one item, or every item of the fingerprint when `index` is `None`.
    pub async fn invalidate(&self, fp: &RequestFingerprint, index: Option<u32>) -> Result<u64> {
        let path = match index {
            Some(i) => entry_path(fp, i),
            None => doc_path(&[ROOT, fp.as_str()]),
        };
        let removed = self.store.delete(&path).await?;
        tracing::info!(fingerprint = fp.short(), ?index, removed, "cache invalidated");
        Ok(removed)
    }
}

fn decode(fp: &RequestFingerprint, index: u32, doc: serde_json::Value) -> Option<CacheEntry> {
    match serde_json::from_value::<CacheEntry>(doc) {
        Ok(entry) if !entry.artifact.parts.is_empty() => Some(entry),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(fingerprint = fp.short(), index, "ignoring malformed cache entry: {}", e);
            None
        }
    }
}
