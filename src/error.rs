//! Error taxonomy shared by servers and clients.
//!
//! # Propagation
//! ```text
//! Configuration  → reported at setup, never retried
//! Transport      → retried locally by the clients, then surfaced as an Error envelope
//! Overload       → pool exhausted, surfaced as an Error envelope
//! RouteNotFound  → NotFound envelope with API_NOT_FOUND
//! Internal       → recovered panic, Error envelope with INTERNAL_SERVICE_ERROR
//! ```

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error code attached to envelopes produced from a recovered panic.
pub const INTERNAL_SERVICE_ERROR: &str = "INTERNAL_SERVICE_ERROR";

/// Error code attached to envelopes when no route matched.
pub const API_NOT_FOUND: &str = "API_NOT_FOUND";

/// Crate-level error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Malformed route pattern, descriptor or server setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level failure talking to a peer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No route registered for the inbound method and path.
    #[error("API Method/Path {method} {path} isn't found")]
    RouteNotFound { method: String, path: String },

    /// A handler panicked while serving a request.
    #[error("internal error: {0}")]
    Internal(String),

    /// Listener or filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RuntimeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Errors raised by the outbound transports and the connection pool.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open a connection to the target.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The connection was already closed when it was used.
    #[error("connection not open")]
    Closed,

    /// The operation exceeded the configured deadline.
    #[error("i/o timeout after {0:?}")]
    Timeout(Duration),

    /// Read or write failure on an open connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that do not decode as a valid message.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer answered with an application exception.
    #[error("remote exception: {0}")]
    Remote(String),

    /// Every pooled connection stayed busy for the whole acquisition window.
    #[error("OVERLOAD : connection pool is overloaded, fail to make request to {path}")]
    Overload { path: String },
}

impl TransportError {
    /// Errors that justify an immediate retry on a fresh connection.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Closed | TransportError::Timeout(_) | TransportError::Overload { .. } => {
                true
            }
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            TransportError::Connect { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            TransportError::Codec(_) | TransportError::Remote(_) => false,
        }
    }
}

/// Errors surfaced by the outbound HTTP client and the service facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be built (bad URL, header, method or body).
    #[error("failed to build request: {0}")]
    Build(String),

    /// Every attempt failed or was rejected.
    #[error("fail to call endpoint API {url} after {attempts} attempt(s)")]
    Exhausted { url: String, attempts: u32 },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A route descriptor is not `METHOD::/path`.
    #[error("invalid endpoint configuration: {0}")]
    InvalidDescriptor(String),
}

/// Error returned by a handler or pre-handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RespondError> for HandlerError {
    fn from(e: RespondError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid content: {}", e))
    }
}

/// Rejections raised by `Responder::respond`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespondError {
    #[error("data response must be a slice")]
    DataNotSequence,
}
