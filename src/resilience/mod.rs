//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → timeouts.rs (every connect, read and write has a deadline)
//!     → On failure: retries.rs (quick retry for transient errors, then fixed-delay retries)
//!     → Exhausted: the client turns the last error into an Error envelope
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network operation has a deadline
//! - Fixed wait between attempts, no jitter (matches what peers expect)
//! - Transient errors are classified by variant, not by message text

pub mod retries;
pub mod timeouts;

pub use retries::{Attempt, RetryPolicy, QUICK_RETRY_WINDOW};
pub use timeouts::with_timeout;
