//! Protocol-neutral request/response abstraction.
//!
//! # Data Flow
//! ```text
//! native request (axum Request | framed binary call)
//!     → transport adapter → Request
//!     → Handler::call(&mut Request, &mut Responder)
//!     → Responder::respond(ApiResponse) → Reply
//!     → transport adapter → native reply
//! ```
//!
//! # Design Decisions
//! - One concrete `Request`/`Responder` pair serves both transports
//! - Attributes are a bag of `serde_json::Value`, read back typed
//! - Bodies stay raw `Bytes` until a handler asks for text or JSON

pub mod handler;
pub mod method;
pub mod request;
pub mod responder;
pub mod response;
pub mod status;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use handler::{handler_fn, Handler, SharedHandler};
pub use method::Method;
pub use request::{Attributes, Request};
pub use responder::{Reply, Responder, X_EXECUTION_TIME, X_HOSTNAME};
pub use response::ApiResponse;
pub use status::ApiStatus;

/// Wire protocol carrying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Binary,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Binary => "binary",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Protocol::Http),
            "binary" | "thrift" => Ok(Protocol::Binary),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}
