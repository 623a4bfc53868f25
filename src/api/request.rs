//! Protocol-neutral request.
//!
//! # Responsibilities
//! - Carry method, path, query params, headers and path variables
//! - Hold the raw body and decode it on demand (text or JSON), once
//! - Provide a request-scoped attribute bag for pre-handlers and handlers
//! - Resolve the client IP (`X-Forwarded-For` first entry, else peer address)
//!
//! Both transports adapt their native request into this type; outbound
//! clients take the same type as the description of the call to make.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::{Method, Protocol};

/// Header carrying the originating client address chain.
pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Request-scoped values set by pre-handlers and handlers.
#[derive(Debug, Default, Clone)]
pub struct Attributes {
    values: HashMap<String, Value>,
}

impl Attributes {
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed read. `None` when missing or of a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug)]
pub struct Request {
    protocol: Protocol,
    method: Method,
    path: String,
    params: HashMap<String, String>,
    headers: HashMap<String, String>,
    vars: HashMap<String, String>,
    body: Bytes,
    text: OnceLock<String>,
    attributes: Attributes,
    peer: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Http,
            method,
            path: path.into(),
            params: HashMap::new(),
            headers: HashMap::new(),
            vars: HashMap::new(),
            body: Bytes::new(),
            text: OnceLock::new(),
            attributes: Attributes::default(),
            peer: None,
        }
    }

    // --- Builders ---

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.text = OnceLock::new();
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.with_body(bytes))
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    // --- Accessors ---

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameter, or empty when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Path variable bound by the router, or empty when absent.
    pub fn var(&self, name: &str) -> &str {
        self.vars.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Header lookup. Exact key first, then case-insensitive.
    pub fn header(&self, name: &str) -> &str {
        if let Some(v) = self.headers.get(name) {
            return v;
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, decoded on first access.
    pub fn content_text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Body decoded as JSON.
    pub fn content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn set_attribute<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.set(key, value);
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Best guess at the originating client address.
    pub fn client_ip(&self) -> String {
        let forwarded = self.header(X_FORWARDED_FOR);
        if !forwarded.is_empty() {
            return forwarded
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
        }
        self.peer.map(|p| p.ip().to_string()).unwrap_or_default()
    }
}

impl Clone for Request {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol,
            method: self.method.clone(),
            path: self.path.clone(),
            params: self.params.clone(),
            headers: self.headers.clone(),
            vars: self.vars.clone(),
            body: self.body.clone(),
            text: OnceLock::new(),
            attributes: self.attributes.clone(),
            peer: self.peer,
        }
    }
}
