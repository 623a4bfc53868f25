//! In-memory document store.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::store::{DocumentStore, IndexSpec, StoreError};

/// Collections kept in a `DashMap`; each collection is locked per operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Value>>,
    indexes: DashMap<String, Vec<IndexSpec>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.indexes
            .get(collection)
            .map(|specs| specs.clone())
            .unwrap_or_default()
    }

    /// Drop documents past a TTL index deadline.
    fn purge_expired(&self, collection: &str, docs: &mut Vec<Value>) {
        let Some(specs) = self.indexes.get(collection) else {
            return;
        };
        let now = now_millis();
        for spec in specs.iter() {
            let (Some(ttl), Some(key)) = (spec.expire_after, spec.keys.first()) else {
                continue;
            };
            let ttl = ttl.as_millis() as u64;
            docs.retain(|doc| match doc.get(key).and_then(Value::as_u64) {
                Some(created) => now.saturating_sub(created) < ttl,
                None => true,
            });
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

fn filter_fields(filter: &Value) -> Result<Option<&Map<String, Value>>, StoreError> {
    match filter {
        Value::Null => Ok(None),
        Value::Object(fields) => Ok(Some(fields)),
        _ => Err(StoreError::InvalidFilter),
    }
}

fn matches_filter(doc: &Value, filter: Option<&Map<String, Value>>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().all(|(key, expected)| match doc.get(key) {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, mut doc: Value) -> Result<Value, StoreError> {
        let fields = doc.as_object_mut().ok_or(StoreError::NotAnObject)?;
        fields
            .entry("_id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));

        let mut docs = self.collections.entry(collection.to_string()).or_default();
        self.purge_expired(collection, &mut docs);
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let filter = filter_fields(filter)?;
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(Vec::new());
        };
        self.purge_expired(collection, &mut docs);
        Ok(docs
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> Result<Option<Value>, StoreError> {
        let filter = filter_fields(filter)?;
        let update = update.as_object().ok_or(StoreError::NotAnObject)?;
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        self.purge_expired(collection, &mut docs);

        let Some(doc) = docs.iter_mut().find(|doc| matches_filter(doc, filter)) else {
            return Ok(None);
        };
        if let Some(fields) = doc.as_object_mut() {
            for (key, value) in update {
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(Some(doc.clone()))
    }

    async fn count(&self, collection: &str, filter: &Value) -> Result<usize, StoreError> {
        let filter = filter_fields(filter)?;
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        self.purge_expired(collection, &mut docs);
        Ok(docs.iter().filter(|doc| matches_filter(doc, filter)).count())
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError> {
        let mut specs = self.indexes.entry(collection.to_string()).or_default();
        if !specs.contains(&index) {
            tracing::debug!(collection, keys = ?index.keys, "Index created");
            specs.push(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_query_count() {
        let store = MemoryStore::new();
        store.create("logs", json!({"status": "OK", "keys": ["a", "b"]})).await.unwrap();
        store.create("logs", json!({"status": "ERROR", "keys": ["b"]})).await.unwrap();

        assert_eq!(store.count("logs", &Value::Null).await.unwrap(), 2);
        assert_eq!(store.count("logs", &json!({"keys": "b"})).await.unwrap(), 2);
        assert_eq!(store.count("logs", &json!({"keys": "a"})).await.unwrap(), 1);

        let errors = store.query("logs", &json!({"status": "ERROR"}), 0, 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["_id"].is_string());

        let page = store.query("logs", &Value::Null, 1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(store.count("missing", &Value::Null).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_one_sets_fields_on_first_match() {
        let store = MemoryStore::new();
        store.create("accounts", json!({"name": "a", "tries": 0})).await.unwrap();
        store.create("accounts", json!({"name": "a", "tries": 0})).await.unwrap();

        let updated = store
            .update_one("accounts", &json!({"name": "a"}), &json!({"tries": 1}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["tries"], 1);
        assert_eq!(store.count("accounts", &json!({"tries": 1})).await.unwrap(), 1);
        assert!(store
            .update_one("accounts", &json!({"name": "z"}), &json!({"tries": 1}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ttl_index_drops_old_documents() {
        let store = MemoryStore::new();
        store
            .create_index("logs", IndexSpec::ttl("created_time", Duration::from_secs(60)))
            .await
            .unwrap();
        store.create("logs", json!({"created_time": 0})).await.unwrap();
        store.create("logs", json!({"created_time": now_millis()})).await.unwrap();
        assert_eq!(store.count("logs", &Value::Null).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_non_objects() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create("x", json!([1, 2])).await,
            Err(StoreError::NotAnObject)
        ));
        assert!(matches!(
            store.query("x", &json!("nope"), 0, 1).await,
            Err(StoreError::InvalidFilter)
        ));
    }

    #[tokio::test]
    async fn index_creation_is_idempotent() {
        let store = MemoryStore::new();
        store.create_index("logs", IndexSpec::on(&["keys"])).await.unwrap();
        store.create_index("logs", IndexSpec::on(&["keys"])).await.unwrap();
        assert_eq!(store.indexes("logs").len(), 1);
    }
}
