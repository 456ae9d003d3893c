//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Circuit breaker, cache backends and the RBAC layer produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event (circuit, key, error)
//! - Metrics are cheap and safe to record without an exporter

pub mod logging;
pub mod metrics;
