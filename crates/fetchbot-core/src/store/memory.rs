use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{merge_patch, DocumentStore};

/// Process-local store. Used by tests and by one-shot runs that do not need persistence.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.get(path).cloned())
    }

    async fn set(&self, path: &str, doc: &Value) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        docs.insert(path.to_string(), doc.clone());
        Ok(())
    }

    async fn update(&self, path: &str, patch: &Value) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let merged = merge_patch(docs.remove(path), patch);
        docs.insert(path.to_string(), merged);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<u64> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let children = format!("{path}/");
        let before = docs.len();
        docs.retain(|k, _| k != path && !k.starts_with(&children));
        Ok((before - docs.len()) as u64)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_behaves() {
        let store = MemoryStore::new();
        crate::store::tests::exercise_store(&store).await;
        assert_eq!(store.len(), 1);
    }
}
