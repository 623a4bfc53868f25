//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::Protocol;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Application identity.
    pub app: AppConfig,

    /// Inbound servers, numbered from 1 in declaration order.
    pub servers: Vec<ServerConfig>,

    /// Outbound clients, looked up by name.
    pub clients: Vec<ClientConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RuntimeConfig {
    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,

    /// Overrides the OS hostname stamped on every response.
    pub hostname: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "rpc-runtime".to_string(),
            hostname: None,
        }
    }
}

/// One inbound server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub protocol: Protocol,

    /// Plain listening port.
    pub port: u16,

    /// Optional TLS port (HTTP only).
    pub ssl_port: Option<u16>,

    /// Certificate and key for `ssl_port`.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            port: 8080,
            ssl_port: None,
            tls: None,
            max_connections: 10_000,
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// TLS certificate material.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// One outbound client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identifier used by application code.
    pub name: String,

    pub protocol: Protocol,

    /// Base URL (HTTP) or `host:port` (binary).
    pub address: String,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    pub max_retry: u32,

    /// Fixed wait between attempts in milliseconds.
    pub wait_to_retry_ms: u64,

    /// Binary pool capacity.
    pub max_connections: usize,

    /// Binary pooled connections older than this are replaced.
    pub max_conn_age_secs: u64,

    /// Store collection receiving call logs. No logging when unset.
    pub log_collection: Option<String>,

    /// TTL of call log documents in seconds.
    pub log_expiration_secs: Option<u64>,

    /// Persist only calls that ended in error.
    pub error_log_only: bool,

    /// Accept any HTTP status as a final answer.
    pub accept_http_error: bool,

    /// Outbound HTTP proxy.
    pub proxy_url: Option<String>,

    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            protocol: Protocol::Http,
            address: String::new(),
            timeout_ms: 10_000,
            max_retry: 0,
            wait_to_retry_ms: 1_000,
            max_connections: 50,
            max_conn_age_secs: 600,
            log_collection: None,
            log_expiration_secs: None,
            error_log_only: false,
            accept_http_error: false,
            proxy_url: None,
            accept_invalid_certs: true,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn wait_to_retry(&self) -> Duration {
        Duration::from_millis(self.wait_to_retry_ms)
    }

    pub fn max_conn_age(&self) -> Duration {
        Duration::from_secs(self.max_conn_age_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}
