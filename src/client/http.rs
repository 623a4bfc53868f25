//! Outbound HTTP client.
//!
//! # Responsibilities
//! - Build the request (query or form params, JSON body, default headers)
//! - Retry transport failures and unaccepted statuses with a fixed wait
//! - Decode gzip bodies
//! - Record every attempt in one call log entry
//!
//! # Design Decisions
//! - A response is final when it is 2xx or 4xx, or any status in
//!   accept-HTTP-error mode
//! - reqwest is used without its decompression features; gzip is decoded
//!   here so the raw status and headers of each attempt are logged as received

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE,
    USER_AGENT,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiResponse, ApiStatus, Method, Protocol};
use crate::client::log::{CallLogEntry, CallLogger, CallResult, CallStatus, DEFAULT_LOG_EXPIRATION};
use crate::client::{ApiClient, OutboundRequest};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::net::local_hostname;
use crate::observability::metrics::{self, outcome};
use crate::resilience::RetryPolicy;
use crate::store::SharedStore;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Raw outcome of an accepted HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResult {
    pub code: u16,
    /// Body as text, after gzip decoding.
    pub body: String,
    pub content: Bytes,
}

impl RestResult {
    /// Decode the body as an envelope.
    ///
    /// A body without `status` gets one derived from the HTTP code. An
    /// undecodable body becomes an `Error` envelope carrying the raw text.
    pub fn to_envelope(&self) -> ApiResponse {
        let decoded = serde_json::from_slice::<Value>(&self.content).and_then(|mut value| {
            if let Value::Object(map) = &mut value {
                let missing = map
                    .get("status")
                    .and_then(Value::as_str)
                    .map_or(true, str::is_empty);
                if missing {
                    let status = ApiStatus::from_http_code(self.code);
                    map.insert("status".into(), Value::String(status.as_str().to_string()));
                }
            }
            serde_json::from_value::<ApiResponse>(value)
        });
        decoded.unwrap_or_else(|e| {
            ApiResponse::error(format!("Response Data Error: {}", e)).with_data(vec![self.body.clone()])
        })
    }
}

/// Join a base URL and a path with exactly the separator they need.
fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else if base.ends_with('/') || path.starts_with('/') {
        format!("{}{}", base, path)
    } else if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

fn encode_params(params: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = params.iter().collect();
    pairs.sort();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn gunzip(raw: &[u8]) -> std::io::Result<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
    policy: RetryPolicy,
    accept_http_error: bool,
    logger: Option<CallLogger>,
    user_agent: String,
}

impl HttpClient {
    /// Build from config. Calls are logged to `store` when the config names
    /// a log collection.
    pub fn from_config(config: &ClientConfig, store: Option<SharedStore>) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| ClientError::Build(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder.build().map_err(|e| ClientError::Build(e.to_string()))?;

        let logger = match (&config.log_collection, store) {
            (Some(collection), Some(store)) => Some(
                CallLogger::new(store, collection)
                    .with_expiration(
                        config
                            .log_expiration_secs
                            .map(std::time::Duration::from_secs)
                            .unwrap_or(DEFAULT_LOG_EXPIRATION),
                    )
                    .with_error_log_only(config.error_log_only),
            ),
            _ => None,
        };

        let base_url = if config.address.is_empty() || config.address.starts_with("http") {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };

        Ok(Self {
            base_url,
            http,
            policy: RetryPolicy::from(config),
            accept_http_error: config.accept_http_error,
            logger,
            user_agent: format!("rpc-runtime/{} {}", env!("CARGO_PKG_VERSION"), local_hostname()),
        })
    }

    pub fn with_accept_http_error(mut self, accept: bool) -> Self {
        self.accept_http_error = accept;
        self
    }

    pub fn with_logger(mut self, logger: CallLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn logger(&self) -> Option<&CallLogger> {
        self.logger.as_ref()
    }

    fn accepts(&self, code: u16) -> bool {
        self.accept_http_error || (200..300).contains(&code) || (400..500).contains(&code)
    }

    /// Issue one call with retries and return the accepted response.
    pub async fn make_http_request(
        &self,
        method: &Method,
        headers: &HashMap<String, String>,
        params: &HashMap<String, String>,
        body: Option<&Value>,
        path: &str,
        keys: &[String],
    ) -> Result<RestResult, ClientError> {
        let started = Instant::now();
        let base = join_url(&self.base_url, path);

        let mut entry = CallLogEntry::new(method.as_str(), &base, &self.user_agent);
        entry.req_header = headers.clone();
        entry.req_form_data = params.clone();
        entry.req_body = body.cloned();
        entry.keys = keys.to_vec();

        let prepared = self.prepare(method, headers, params, body, base);
        let (http_method, url, header_map, payload) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                entry.error_log = Some(e.to_string());
                entry.finish(CallStatus::Failed, started);
                self.log(entry);
                return Err(e);
            }
        };

        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.policy.pause().await;
            }
            let attempt_started = Instant::now();
            let mut result = CallResult::default();

            let mut request = self
                .http
                .request(http_method.clone(), url.as_str())
                .headers(header_map.clone());
            if let Some(payload) = &payload {
                request = request.body(payload.clone());
            }

            match request.send().await {
                Ok(resp) => match read_response(resp, &mut result).await {
                    Ok(rest) if self.accepts(rest.code) => {
                        result.response_time = attempt_started.elapsed().as_millis() as u64;
                        entry.add_result(result);
                        entry.finish(CallStatus::Success, started);
                        metrics::record_outbound_attempt(Protocol::Http, outcome::SUCCESS);
                        debug!(method = %method, url = %url, status = rest.code, attempt, "HTTP call completed");
                        self.log(entry);
                        return Ok(rest);
                    }
                    Ok(rest) => {
                        debug!(url = %url, status = rest.code, attempt, "HTTP status not accepted, retrying");
                    }
                    Err(e) => result.error_log = Some(e),
                },
                Err(e) => {
                    debug!(url = %url, attempt, error = %e, "HTTP call failed");
                    result.error_log = Some(e.to_string());
                }
            }

            result.response_time = attempt_started.elapsed().as_millis() as u64;
            entry.add_result(result);
            metrics::record_outbound_attempt(Protocol::Http, outcome::RETRY);
        }

        let err = ClientError::Exhausted {
            url: entry.req_url.clone(),
            attempts,
        };
        metrics::record_outbound_attempt(Protocol::Http, outcome::FAILURE);
        warn!(method = %method, url = %url, attempts, "HTTP call failed after all attempts");
        entry.error_log = Some(err.to_string());
        entry.finish(CallStatus::Failed, started);
        self.log(entry);
        Err(err)
    }

    /// Resolve method, final URL, headers and body bytes.
    fn prepare(
        &self,
        method: &Method,
        headers: &HashMap<String, String>,
        params: &HashMap<String, String>,
        body: Option<&Value>,
        base: String,
    ) -> Result<(reqwest::Method, String, HeaderMap, Option<Bytes>), ClientError> {
        let http_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| ClientError::Build(format!("invalid method {}: {}", method, e)))?;

        let form = *method == Method::Post
            && headers.get("Content-Type").map(String::as_str) == Some(FORM_CONTENT_TYPE)
            && !params.is_empty();

        let (url, payload) = if form {
            (base, Some(Bytes::from(encode_params(params))))
        } else {
            let url = if params.is_empty() {
                base
            } else {
                format!("{}?{}", base, encode_params(params))
            };
            let payload = body
                .map(serde_json::to_vec)
                .transpose()
                .map_err(|e| ClientError::Build(format!("invalid body: {}", e)))?
                .map(Bytes::from);
            (url, payload)
        };

        let mut header_map = HeaderMap::new();
        if payload.is_some() && !form {
            header_map.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        header_map.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        header_map.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| ClientError::Build(format!("invalid user agent: {}", e)))?;
        header_map.insert(USER_AGENT, agent);
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ClientError::Build(format!("invalid header name {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Build(format!("invalid header value for {}: {}", key, e)))?;
            header_map.insert(name, value);
        }

        Ok((http_method, url, header_map, payload))
    }

    fn log(&self, entry: CallLogEntry) {
        if let Some(logger) = &self.logger {
            logger.write(entry);
        }
    }
}

/// Read status, `X-` headers and the (decoded) body into `result`.
async fn read_response(resp: reqwest::Response, result: &mut CallResult) -> Result<RestResult, String> {
    let code = resp.status().as_u16();
    let gzipped = resp
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    let mut kept: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in resp.headers() {
        if name.as_str().starts_with("x-") {
            kept.entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }

    let raw = resp.bytes().await.map_err(|e| e.to_string())?;
    let content = if gzipped {
        gunzip(&raw).map_err(|e| format!("gzip decode failed: {}", e))?
    } else {
        raw
    };
    let body = String::from_utf8_lossy(&content).into_owned();

    result.resp_code = Some(code);
    result.resp_header = kept;
    result.resp_body = Some(body.clone());
    Ok(RestResult { code, body, content })
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn make_request(&self, req: &OutboundRequest) -> ApiResponse {
        let body = match req.method {
            Method::Put | Method::Post => req.body.as_ref(),
            _ => None,
        };
        match self
            .make_http_request(&req.method, &req.headers, &req.params, body, &req.path, &req.keys)
            .await
        {
            Ok(rest) => rest.to_envelope(),
            Err(e) => ApiResponse::error(format!("HTTP Endpoint Error: {}", e)),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rest(code: u16, body: &str) -> RestResult {
        RestResult {
            code,
            body: body.to_string(),
            content: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn joins_urls() {
        assert_eq!(join_url("http://a", "/x"), "http://a/x");
        assert_eq!(join_url("http://a/", "x"), "http://a/x");
        assert_eq!(join_url("http://a", "x"), "http://a/x");
        assert_eq!(join_url("", "x"), "x");
        assert_eq!(join_url("http://a", ""), "http://a");
    }

    #[test]
    fn envelope_status_derived_from_code() {
        let env = rest(404, r#"{"message":"gone"}"#).to_envelope();
        assert_eq!(env.status, ApiStatus::NotFound);
        assert_eq!(env.message, "gone");

        let env = rest(200, r#"{"status":"","data":[1]}"#).to_envelope();
        assert_eq!(env.status, ApiStatus::Ok);
        assert_eq!(env.data, Some(json!([1])));

        let env = rest(500, r#"{"status":"EXISTED"}"#).to_envelope();
        assert_eq!(env.status, ApiStatus::Existed);
    }

    #[test]
    fn undecodable_body_keeps_raw_text() {
        let env = rest(200, "<html>").to_envelope();
        assert_eq!(env.status, ApiStatus::Error);
        assert!(env.message.starts_with("Response Data Error: "));
        assert_eq!(env.data, Some(json!(["<html>"])));
    }

    #[test]
    fn address_without_scheme_gets_http() {
        let client = HttpClient::from_config(
            &ClientConfig {
                address: "users:8080".into(),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://users:8080");
    }

    #[test]
    fn form_posts_move_params_into_body() {
        let client = HttpClient::from_config(&ClientConfig::default(), None).unwrap();
        let headers = HashMap::from([("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string())]);
        let params = HashMap::from([("b".to_string(), "2".to_string()), ("a".to_string(), "1 2".to_string())]);

        let (_, url, map, payload) = client
            .prepare(&Method::Post, &headers, &params, Some(&json!({"x": 1})), "http://h/p".into())
            .unwrap();
        assert_eq!(url, "http://h/p");
        assert_eq!(payload, Some(Bytes::from("a=1+2&b=2")));
        assert_eq!(map[CONTENT_TYPE], FORM_CONTENT_TYPE);

        let (_, url, map, payload) = client
            .prepare(&Method::Get, &HashMap::new(), &params, Some(&json!({"x": 1})), "http://h/p".into())
            .unwrap();
        assert_eq!(url, "http://h/p?a=1+2&b=2");
        assert_eq!(payload, Some(Bytes::from(r#"{"x":1}"#)));
        assert_eq!(map[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(map[ACCEPT_ENCODING], "gzip");
    }

    #[test]
    fn caller_headers_override_defaults() {
        let client = HttpClient::from_config(&ClientConfig::default(), None).unwrap();
        let headers = HashMap::from([("Accept".to_string(), "text/plain".to_string())]);
        let (_, _, map, _) = client
            .prepare(&Method::Get, &headers, &HashMap::new(), None, "http://h".into())
            .unwrap();
        assert_eq!(map.get_all(ACCEPT).iter().count(), 1);
        assert_eq!(map[ACCEPT], "text/plain");
        assert!(map.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn gunzip_round_trip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"status":"OK"}"#).unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(gunzip(&packed).unwrap(), Bytes::from(r#"{"status":"OK"}"#));
    }
}
