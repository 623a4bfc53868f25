//! Outbound clients.
//!
//! # Data Flow
//! ```text
//! OutboundRequest
//!     → new_api_client(config) picks HttpClient or BinaryClient
//!     → http.rs: retry loop over reqwest, gzip decode, CallLogEntry → log.rs
//!     → binary.rs: RetryPolicy → pool.rs (acquire, call, release) → codec
//!     → ApiResponse (never an Err: failures become Error envelopes)
//! ```
//!
//! # Design Decisions
//! - Clients own their pools and loggers; nothing is global
//! - Both clients answer with the neutral envelope so callers need not care
//!   which protocol a peer speaks

pub mod binary;
pub mod http;
pub mod log;
pub mod pool;
pub mod service;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::api::{ApiResponse, Method, Protocol, Request};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::store::SharedStore;

pub use binary::{BinaryClient, TcpConnector, TcpRpcConnection};
pub use http::{HttpClient, RestResult};
pub use log::{CallLogEntry, CallLogger, CallResult, CallStatus};
pub use pool::{ConnectionPool, Connector, PoolOptions, PooledConnection, RpcConnection};
pub use service::{status_for_code, ApiOption, CallOptions, ServiceClient};

/// A call to another service.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    /// Correlation keys attached to the call log.
    pub keys: Vec<String>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            keys: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    /// Body to send, only for methods that carry one.
    pub fn content(&self) -> Option<&Value> {
        if self.method.has_body() {
            self.body.as_ref()
        } else {
            None
        }
    }
}

/// Forward an inbound request as is.
impl From<&Request> for OutboundRequest {
    fn from(req: &Request) -> Self {
        let text = req.content_text();
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
        };
        Self {
            method: req.method().clone(),
            path: req.path().to_string(),
            params: req.params().clone(),
            headers: req.headers().clone(),
            body,
            keys: Vec::new(),
        }
    }
}

/// A client for one peer service.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue the call with retries. Failures come back as `Error` envelopes.
    async fn make_request(&self, req: &OutboundRequest) -> ApiResponse;

    fn protocol(&self) -> Protocol;
}

pub type SharedClient = Arc<dyn ApiClient>;

/// Build the client described by `config`. `store` receives call logs when
/// the config names a log collection.
pub fn new_api_client(
    config: &ClientConfig,
    store: Option<SharedStore>,
) -> Result<SharedClient, ClientError> {
    match config.protocol {
        Protocol::Http => Ok(Arc::new(HttpClient::from_config(config, store)?)),
        Protocol::Binary => Ok(Arc::new(BinaryClient::from_config(config))),
    }
}
