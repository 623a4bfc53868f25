//! Protocol-agnostic RPC runtime.
//!
//! Handlers are written once against a neutral [`api::Request`] /
//! [`api::Responder`] pair and exposed over HTTP/JSON and a framed binary RPC
//! transport. Outbound clients for both protocols share retry, pooling and
//! call logging.

pub mod api;
pub mod app;
pub mod binary;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod server;
pub mod store;

pub use api::{handler_fn, ApiResponse, ApiStatus, Method, Protocol, Request, Responder};
pub use app::App;
pub use binary::BinaryServer;
pub use client::{new_api_client, ApiClient, OutboundRequest, ServiceClient};
pub use config::RuntimeConfig;
pub use error::{ClientError, HandlerError, RuntimeError, TransportError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use server::ApiServer;
