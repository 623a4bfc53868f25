//! Binary RPC transport.
//!
//! # Data Flow
//! ```text
//! TCP stream
//!     → frame.rs (4-byte length prefix)
//!     → codec.rs (message header, request/response structs)
//!     → server.rs (dispatch, reply or exception)
//! ```
//!
//! The outbound side reuses `frame` and `codec` from `client::binary`.

pub mod codec;
pub mod frame;
pub mod server;

pub use codec::{WireRequest, WireResponse};
pub use server::BinaryServer;
