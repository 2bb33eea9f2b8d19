//! In-memory store implementation.
//!
//! Backs tests and embedders that accept non-durable state. A single lock
//! guards the collection map, which is more than enough to satisfy the
//! per-document atomicity contract.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Document, Filter, Store};
use crate::error::StoreFault;

/// Map-backed [`Store`] with no durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    /// Whether a collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreFault> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| filter.matches(doc)).cloned()))
    }

    async fn find_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreFault> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
    ) -> Result<bool, StoreFault> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        let replaced = docs.len() < before;
        docs.push(document);
        Ok(replaced)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreFault> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_replaces_matching_document() {
        let store = MemoryStore::new();
        let by_user = Filter::all().eq("user_id", "u1");

        let replaced = store
            .upsert("grants", &by_user, json!({"user_id": "u1", "granted_by": "owner"}))
            .await
            .unwrap();
        assert!(!replaced);

        let replaced = store
            .upsert("grants", &by_user, json!({"user_id": "u1", "granted_by": "admin"}))
            .await
            .unwrap();
        assert!(replaced);
        assert_eq!(store.len("grants"), 1);

        let doc = store.find_one("grants", &by_user).await.unwrap().unwrap();
        assert_eq!(doc["granted_by"], "admin");
    }

    #[tokio::test]
    async fn delete_returns_count() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let filter = Filter::all().eq("user_id", format!("u{i}"));
            store
                .upsert("tokens", &filter, json!({"user_id": format!("u{i}"), "expires_at": i}))
                .await
                .unwrap();
        }

        let removed = store
            .delete("tokens", &Filter::all().lt("expires_at", 2))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len("tokens"), 1);

        let removed = store
            .delete("tokens", &Filter::all().lt("expires_at", 2))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn missing_collection_reads_as_empty() {
        let store = MemoryStore::new();
        assert!(store.find_one("nope", &Filter::all()).await.unwrap().is_none());
        assert!(store.find_all("nope", &Filter::all()).await.unwrap().is_empty());
        assert_eq!(store.delete("nope", &Filter::all()).await.unwrap(), 0);
    }
}
