//! Service client facade.
//!
//! Calls one peer service by route descriptor (`POST::/orders/:var_id`).
//! Options from several call sites merge into one [`CallOptions`]; APIs
//! configured with a log collection get their own logging client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::{ApiResponse, ApiStatus};
use crate::client::http::{HttpClient, RestResult};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::routing::pattern::{parse_descriptor, substitute_vars};
use crate::store::SharedStore;

/// Timeout used when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error code on envelopes for an unusable descriptor.
pub const INVALID_ENDPOINT_CONFIGURATION: &str = "INVALID_ENDPOINT_CONFIGURATION";

/// One caller's contribution to a call. Unset fields leave the merge alone.
#[derive(Debug, Clone, Default)]
pub struct ApiOption {
    pub keys: Option<Vec<String>>,
    pub save_log: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub params: Option<HashMap<String, String>>,
    pub vars: Option<HashMap<String, String>>,
    pub get_total: Option<bool>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Query filter; strings are sent as is, anything else as JSON.
    pub q: Option<Value>,
    pub body: Option<Value>,
}

impl ApiOption {
    pub fn keys(keys: Vec<String>) -> Self {
        Self {
            keys: Some(keys),
            ..Default::default()
        }
    }

    pub fn body(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn paging(mut self, offset: u64, limit: u64, get_total: bool) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self.get_total = Some(get_total);
        self
    }

    pub fn without_log(mut self) -> Self {
        self.save_log = Some(false);
        self
    }
}

/// Options for one call, after merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub keys: Vec<String>,
    pub save_log: Option<bool>,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub vars: HashMap<String, String>,
    pub body: Option<Value>,
}

impl CallOptions {
    /// Merge options in order.
    ///
    /// Keys accumulate. Headers, params, vars and body are replaced by later
    /// options. `q`, `getTotal`, `offset` and `limit` are written into the
    /// params current at that point.
    pub fn merged(options: impl IntoIterator<Item = ApiOption>) -> Self {
        let mut out = Self::default();
        for opt in options {
            if let Some(keys) = opt.keys {
                out.keys.extend(keys);
            }
            if opt.save_log.is_some() {
                out.save_log = opt.save_log;
            }
            if let Some(params) = opt.params {
                out.params = params;
            }
            if let Some(vars) = opt.vars {
                out.vars = vars;
            }
            if let Some(q) = opt.q {
                let q = match q {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.params.insert("q".into(), q);
            }
            if let Some(get_total) = opt.get_total {
                out.params.insert("getTotal".into(), get_total.to_string());
            }
            if let Some(offset) = opt.offset {
                out.params.insert("offset".into(), offset.to_string());
            }
            if let Some(limit) = opt.limit {
                out.params.insert("limit".into(), limit.to_string());
            }
            if opt.body.is_some() {
                out.body = opt.body;
            }
            if let Some(headers) = opt.headers {
                out.headers = headers;
            }
        }
        out
    }
}

/// Status implied by an HTTP code, when the code has one.
pub fn status_for_code(code: u16) -> Option<ApiStatus> {
    match code {
        200..=299 => Some(ApiStatus::Ok),
        400 => Some(ApiStatus::Invalid),
        401 => Some(ApiStatus::Unauthorized),
        403 => Some(ApiStatus::Forbidden),
        404 => Some(ApiStatus::NotFound),
        409 => Some(ApiStatus::Existed),
        500..=599 => Some(ApiStatus::Error),
        _ => None,
    }
}

pub struct ServiceClient {
    host: String,
    timeout: Duration,
    default_client: Arc<HttpClient>,
    clients: HashMap<String, Arc<HttpClient>>,
    store: Option<SharedStore>,
}

impl ServiceClient {
    /// A zero `timeout` means [`DEFAULT_TIMEOUT`].
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let host = host.into();
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        let default_client = HttpClient::from_config(&Self::client_config(&host, timeout, None), None)?;
        Ok(Self {
            host,
            timeout,
            default_client: Arc::new(default_client),
            clients: HashMap::new(),
            store: None,
        })
    }

    /// Store receiving the logs of APIs configured afterwards.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Log calls to `descriptor` into `collection`.
    pub fn with_api(mut self, descriptor: &str, collection: &str) -> Result<Self, ClientError> {
        let config = Self::client_config(&self.host, self.timeout, Some(collection));
        let client = HttpClient::from_config(&config, self.store.clone())?;
        self.clients.insert(descriptor.to_string(), Arc::new(client));
        Ok(self)
    }

    fn client_config(host: &str, timeout: Duration, collection: Option<&str>) -> ClientConfig {
        ClientConfig {
            name: collection.unwrap_or_default().to_string(),
            address: host.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            max_retry: 0,
            wait_to_retry_ms: 0,
            accept_http_error: true,
            log_collection: collection.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn client_for(&self, descriptor: &str, options: &CallOptions) -> &HttpClient {
        if options.save_log == Some(false) {
            return &self.default_client;
        }
        self.clients
            .get(descriptor)
            .map(Arc::as_ref)
            .unwrap_or(&self.default_client)
    }

    /// Call the API named by `descriptor`.
    pub async fn call(&self, descriptor: &str, options: &CallOptions) -> Result<RestResult, ClientError> {
        let client = self.client_for(descriptor, options);
        let resolved = substitute_vars(descriptor, &options.vars);
        let (method, path) =
            parse_descriptor(&resolved).map_err(|_| ClientError::InvalidDescriptor(resolved.clone()))?;
        debug!(host = %self.host, method = %method, path = %path, "Service call");
        client
            .make_http_request(
                &method,
                &options.headers,
                &options.params,
                options.body.as_ref(),
                &path,
                &options.keys,
            )
            .await
    }

    /// Call and decode the body into `T`, returning the HTTP code with it.
    pub async fn request<T: DeserializeOwned>(
        &self,
        descriptor: &str,
        options: &CallOptions,
    ) -> Result<(u16, T), ClientError> {
        let rest = self.call(descriptor, options).await?;
        let value = serde_json::from_slice(&rest.content).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok((rest.code, value))
    }

    /// Call and answer with an envelope whatever happens.
    pub async fn envelope(&self, descriptor: &str, options: &CallOptions) -> ApiResponse {
        match self.call(descriptor, options).await {
            Ok(rest) => rest.to_envelope(),
            Err(ClientError::InvalidDescriptor(_)) => ApiResponse::error("Invalid endpoint configuration")
                .with_error_code(INVALID_ENDPOINT_CONFIGURATION),
            Err(e) => ApiResponse::error(e.to_string()),
        }
    }
}
