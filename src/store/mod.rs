//! Document store collaborator.
//!
//! # Responsibilities
//! - Define the narrow interface the runtime persists through (call logs)
//! - Provide an in-memory implementation used by default and in tests
//!
//! # Design Decisions
//! - Documents are JSON objects; filters are top-level equality
//! - An array field matches a filter value it contains
//! - Stores are owned by the clients that use them and injected as `Arc<dyn DocumentStore>`

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("filter must be a JSON object or null")]
    InvalidFilter,

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// An index to maintain on a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Indexed fields, in order.
    pub keys: Vec<String>,
    /// Documents whose first key (a unix-millisecond timestamp) is older
    /// than this are dropped.
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn on(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            expire_after: None,
        }
    }

    pub fn ttl(key: &str, expire_after: Duration) -> Self {
        Self {
            keys: vec![key.to_string()],
            expire_after: Some(expire_after),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `doc`, returning it as stored (with `_id`).
    async fn create(&self, collection: &str, doc: Value) -> Result<Value, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filter: &Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;

    /// Atomically set `update`'s fields on the first match and return it.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> Result<Option<Value>, StoreError>;

    async fn count(&self, collection: &str, filter: &Value) -> Result<usize, StoreError>;

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;
