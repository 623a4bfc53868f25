//! Transport servers.
//!
//! # Data Flow
//! ```text
//! App::setup_api_server(protocol)
//!     → HttpServer | BinaryServer (boxed as dyn ApiServer)
//!     → set_handler / set_route / pre_request / expose
//!     → start(shutdown): routes frozen into an Arc<Dispatcher>
//!     → per request: adapter → Dispatcher::handle → adapter
//! ```
//!
//! # Design Decisions
//! - One trait, two implementations; both share `Dispatcher`
//! - Routes are registered on `&mut self` before start and are immutable after
//! - `start` consumes the server, so late registration is impossible

pub mod dispatch;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::api::{Method, Protocol, SharedHandler};
use crate::config::schema::{ServerConfig, TlsConfig};
use crate::error::RuntimeError;
use crate::routing::parse_descriptor;

pub use dispatch::{Dispatcher, InternalError, Target};

/// Per-server resource limits.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    pub max_connections: usize,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl From<&ServerConfig> for ServerLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// A transport server exposing handlers over one wire protocol.
#[async_trait]
pub trait ApiServer: Send {
    fn id(&self) -> usize;

    fn protocol(&self) -> Protocol;

    fn hostname(&self) -> &str;

    /// Register `handler` for `method` + `pattern`.
    fn set_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RuntimeError>;

    /// Register by descriptor, e.g. `"GET::/users/:id"`.
    fn set_route(&mut self, descriptor: &str, handler: SharedHandler) -> Result<(), RuntimeError> {
        let (method, pattern) = parse_descriptor(descriptor)?;
        self.set_handler(method, &pattern, handler)
    }

    /// Install the stage run before routing on every request.
    fn pre_request(&mut self, handler: SharedHandler);

    /// Plain listening port.
    fn expose(&mut self, port: u16);

    /// TLS listening port.
    fn expose_ssl(&mut self, port: u16, tls: TlsConfig) -> Result<(), RuntimeError>;

    /// Serve until `shutdown` fires.
    async fn start(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> Result<(), RuntimeError>;
}
