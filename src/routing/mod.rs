//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before start):
//!     set_handler(method, "/users/:id", handler)
//!     → pattern.rs (validate, split into segments)
//!     → router.rs (store under identity (method, pattern))
//!
//! Inbound (binary transport):
//!     (method, path)
//!     → router.rs exact literal hit?  → handler
//!     → matcher.rs score every candidate of that method
//!     → best candidate + bound vars, or NoMatch
//!
//! Inbound (HTTP transport):
//!     RouteTable compiled into an axum Router at start
//! ```
//!
//! # Design Decisions
//! - Routes frozen at start, shared read-only
//! - No regex; plain segment comparison
//! - Deterministic: same table and input always select the same route

pub mod matcher;
pub mod pattern;
pub mod router;

pub use pattern::{parse_descriptor, substitute_vars, RoutePattern, Segment};
pub use router::{Route, RouteMatch, RouteTable};
