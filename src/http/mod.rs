//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum Router compiled from the route table, middleware)
//!     → request.rs (axum request → neutral Request)
//!     → Dispatcher (pre-handler, handler, panic boundary)
//!     → response.rs (Reply → status, headers, JSON envelope)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::HttpServer;
