//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → servers stop accepting → connection tasks finish
//!               → workers stop ticking → App::launch returns
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every task owns its own receiver
//! - Stop accepting first, let in-flight requests complete

pub mod shutdown;
pub mod signals;

pub use shutdown::{signalled, Shutdown};
pub use signals::{spawn_signal_handler, wait_for_signal};
