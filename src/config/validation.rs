//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, capacities, addresses)
//! - Detect duplicate ports and client names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: RuntimeConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::api::Protocol;
use crate::config::schema::RuntimeConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `servers[0].port`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.app.name.trim().is_empty() {
        errors.push(ValidationError::new("app.name", "must not be empty"));
    }

    let mut ports = HashSet::new();
    for (i, server) in config.servers.iter().enumerate() {
        let field = |name: &str| format!("servers[{}].{}", i, name);

        if server.port == 0 {
            errors.push(ValidationError::new(field("port"), "must be non-zero"));
        } else if !ports.insert(server.port) {
            errors.push(ValidationError::new(
                field("port"),
                format!("port {} already used by another server", server.port),
            ));
        }
        if server.max_connections == 0 {
            errors.push(ValidationError::new(field("max_connections"), "must be at least 1"));
        }
        if server.request_timeout_secs == 0 {
            errors.push(ValidationError::new(field("request_timeout_secs"), "must be non-zero"));
        }
        if let Some(ssl_port) = server.ssl_port {
            if server.protocol == Protocol::Binary {
                errors.push(ValidationError::new(
                    field("ssl_port"),
                    "TLS is not supported by the binary transport",
                ));
            }
            if server.tls.is_none() {
                errors.push(ValidationError::new(field("tls"), "required when ssl_port is set"));
            }
            if !ports.insert(ssl_port) {
                errors.push(ValidationError::new(
                    field("ssl_port"),
                    format!("port {} already used by another server", ssl_port),
                ));
            }
        }
    }

    let mut names = HashSet::new();
    for (i, client) in config.clients.iter().enumerate() {
        let field = |name: &str| format!("clients[{}].{}", i, name);

        if client.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(client.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate client name '{}'", client.name),
            ));
        }
        if client.timeout_ms == 0 {
            errors.push(ValidationError::new(field("timeout_ms"), "must be non-zero"));
        }
        match client.protocol {
            Protocol::Http => {
                if url::Url::parse(&client.address).is_err() {
                    errors.push(ValidationError::new(
                        field("address"),
                        format!("'{}' is not a valid URL", client.address),
                    ));
                }
            }
            Protocol::Binary => {
                if client.address.rsplit_once(':').is_none() {
                    errors.push(ValidationError::new(
                        field("address"),
                        format!("'{}' must be host:port", client.address),
                    ));
                }
                if client.max_connections == 0 {
                    errors.push(ValidationError::new(field("max_connections"), "must be at least 1"));
                }
            }
        }
        if let Some(proxy) = &client.proxy_url {
            if url::Url::parse(proxy).is_err() {
                errors.push(ValidationError::new(field("proxy_url"), "is not a valid URL"));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClientConfig, ServerConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RuntimeConfig::default();
        config.servers.push(ServerConfig { port: 8080, ..Default::default() });
        config.servers.push(ServerConfig { port: 8080, ..Default::default() });
        config.servers.push(ServerConfig {
            protocol: Protocol::Binary,
            port: 9000,
            ssl_port: Some(9443),
            ..Default::default()
        });
        config.clients.push(ClientConfig {
            name: "users".into(),
            address: "not a url".into(),
            ..Default::default()
        });
        config.clients.push(ClientConfig {
            name: "users".into(),
            protocol: Protocol::Binary,
            address: "10.0.0.1:9090".into(),
            ..Default::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"servers[1].port"));
        assert!(fields.contains(&"servers[2].ssl_port"));
        assert!(fields.contains(&"servers[2].tls"));
        assert!(fields.contains(&"clients[0].address"));
        assert!(fields.contains(&"clients[1].name"));
    }
}
