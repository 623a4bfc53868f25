//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event, no formatted blobs
//! - Request ID (`x-request-id`) attached by the HTTP trace layer
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
