//! Persistent document store used for cache entries and delivery history.
//!
//! Documents are JSON values addressed by slash-separated paths. A prefix
//! read returns every document under a path, which is how batch cache
//! lookups and history listings avoid one round trip per item.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Create or replace the document at `path`.
    async fn set(&self, path: &str, doc: &Value) -> Result<()>;

    /// Merge top-level keys of `patch` into the document at `path`, creating it if absent.
    async fn update(&self, path: &str, patch: &Value) -> Result<()>;

    /// Delete `path` and every document below it. Returns the number removed.
    async fn delete(&self, path: &str) -> Result<u64>;

    /// All documents whose path starts with `prefix`, ordered by path.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// Join path segments, replacing separators inside a segment.
pub fn doc_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.replace('/', "_"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Shallow merge used by `update` implementations.
pub(crate) fn merge_patch(base: Option<Value>, patch: &Value) -> Value {
    match (base, patch) {
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
            Value::Object(base)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doc_path_escapes_separators() {
        assert_eq!(doc_path(&["cache", "abc", "3"]), "cache/abc/3");
        assert_eq!(doc_path(&["history", "a/b"]), "history/a_b");
    }

    #[test]
    fn merge_patch_overwrites_top_level_keys() {
        let merged = merge_patch(Some(json!({"a": 1, "b": 2})), &json!({"b": 3, "c": 4}));
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(merge_patch(None, &json!({"x": 1})), json!({"x": 1}));
    }

    /// Behavior shared by every store implementation.
    pub(crate) async fn exercise_store(store: &dyn DocumentStore) {
        assert!(store.get("cache/f/1").await.unwrap().is_none());
        store.set("cache/f/1", &json!({"n": 1})).await.unwrap();
        store.set("cache/f/2", &json!({"n": 2})).await.unwrap();
        store.set("cache/f/10", &json!({"n": 10})).await.unwrap();
        store.set("cache/ff/1", &json!({"n": 99})).await.unwrap();
        assert_eq!(store.get("cache/f/1").await.unwrap(), Some(json!({"n": 1})));

        let listed = store.list_prefix("cache/f/").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["cache/f/1", "cache/f/10", "cache/f/2"]);

        store.update("cache/f/1", &json!({"m": true})).await.unwrap();
        assert_eq!(
            store.get("cache/f/1").await.unwrap(),
            Some(json!({"n": 1, "m": true}))
        );

        assert_eq!(store.delete("cache/f/2").await.unwrap(), 1);
        assert_eq!(store.delete("cache/f").await.unwrap(), 2);
        assert!(store.list_prefix("cache/f/").await.unwrap().is_empty());
        assert_eq!(store.get("cache/ff/1").await.unwrap(), Some(json!({"n": 99})));

        // Prefixes are literal and case-sensitive.
        store.set("history/Alice/1", &json!({"n": 1})).await.unwrap();
        store.set("history/alice/2", &json!({"n": 2})).await.unwrap();
        store.set("history/a_ice/3", &json!({"n": 3})).await.unwrap();
        let listed = store.list_prefix("history/alice/").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["history/alice/2"]);
        assert_eq!(store.list_prefix("history/a_").await.unwrap().len(), 1);
        assert_eq!(store.delete("history/alice").await.unwrap(), 1);
        assert!(store.get("history/Alice/1").await.unwrap().is_some());
        assert_eq!(store.delete("history").await.unwrap(), 2);
    }
}
