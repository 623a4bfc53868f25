//! Outbound call logging.
//!
//! # Responsibilities
//! - Snapshot the request and every attempt of one outbound call
//! - Persist the entry once, on a spawned task, after the call completes
//! - Prepare the log collection (TTL index on `created_time`, index on `keys`)
//!
//! # Design Decisions
//! - In error-log-only mode successful calls are not persisted
//! - Index setup runs once, lazily, before the first write
//! - Persistence failures are logged and dropped; they never fail the call

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::store::{IndexSpec, SharedStore, StoreError};

/// Default lifetime of a call log document (21 days).
pub const DEFAULT_LOG_EXPIRATION: Duration = Duration::from_secs(1_814_400);

/// Field carrying the unix-millisecond creation time.
pub const CREATED_TIME: &str = "created_time";

/// Field carrying the correlation keys.
pub const KEYS: &str = "keys";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    Success,
    Failed,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_code: Option<u16>,

    /// Only `X-` prefixed response headers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub resp_header: BTreeMap<String, Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_body: Option<String>,

    /// Milliseconds spent on this attempt.
    pub response_time: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
}

/// One outbound call, every attempt included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CallStatus>,
    pub req_url: String,
    pub req_method: String,
    pub caller: String,
    pub req_header: HashMap<String, String>,
    pub req_form_data: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_body: Option<Value>,
    /// Milliseconds from the first attempt to the final outcome.
    pub total_time: u64,
    pub retry_count: u32,
    pub results: Vec<CallResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    pub keys: Vec<String>,
    pub created_time: u64,
}

impl CallLogEntry {
    pub fn new(method: &str, url: &str, caller: &str) -> Self {
        Self {
            status: None,
            req_url: url.to_string(),
            req_method: method.to_string(),
            caller: caller.to_string(),
            req_header: HashMap::new(),
            req_form_data: HashMap::new(),
            req_body: None,
            total_time: 0,
            retry_count: 0,
            results: Vec::new(),
            error_log: None,
            keys: Vec::new(),
            created_time: now_millis(),
        }
    }

    pub fn add_result(&mut self, result: CallResult) {
        self.results.push(result);
    }

    /// Seal the entry with its final status.
    pub fn finish(&mut self, status: CallStatus, started: Instant) {
        self.status = Some(status);
        self.total_time = started.elapsed().as_millis() as u64;
        self.retry_count = (self.results.len() as u32).saturating_sub(1);
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Writes call log entries to one store collection.
#[derive(Clone)]
pub struct CallLogger {
    store: SharedStore,
    collection: Arc<str>,
    expiration: Duration,
    error_log_only: bool,
    indexes: Arc<OnceCell<()>>,
}

impl std::fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLogger")
            .field("collection", &self.collection)
            .field("error_log_only", &self.error_log_only)
            .finish()
    }
}

impl CallLogger {
    pub fn new(store: SharedStore, collection: &str) -> Self {
        Self {
            store,
            collection: Arc::from(collection),
            expiration: DEFAULT_LOG_EXPIRATION,
            error_log_only: false,
            indexes: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_error_log_only(mut self, error_log_only: bool) -> Self {
        self.error_log_only = error_log_only;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether `entry` would be persisted.
    pub fn should_write(&self, entry: &CallLogEntry) -> bool {
        entry.status != Some(CallStatus::Success) || !self.error_log_only
    }

    /// Persist `entry` in the background.
    pub fn write(&self, entry: CallLogEntry) -> Option<tokio::task::JoinHandle<()>> {
        if !self.should_write(&entry) {
            return None;
        }
        let logger = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = logger.persist(entry).await {
                warn!(collection = %logger.collection, error = %e, "Failed to persist call log");
            }
        }))
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.indexes
            .get_or_try_init(|| async {
                self.store
                    .create_index(&self.collection, IndexSpec::ttl(CREATED_TIME, self.expiration))
                    .await?;
                self.store
                    .create_index(&self.collection, IndexSpec::on(&[KEYS]))
                    .await?;
                debug!(collection = %self.collection, "Call log indexes ready");
                Ok::<_, StoreError>(())
            })
            .await
            .map(|_| ())
    }

    async fn persist(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        self.ensure_indexes().await?;
        let doc = serde_json::to_value(&entry)?;
        self.store.create(&self.collection, doc).await?;
        Ok(())
    }
}
