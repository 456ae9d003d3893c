//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to the network cache store:
//!     → circuit_breaker.rs (refuse fast while the circuit is open)
//!     → timeouts.rs (enforce the per-command deadline)
//!     → outcome recorded back into the circuit's counters
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network command has a deadline
//! - A timed-out command is a failure like any other
//! - The breaker is generic over the wrapped call and its error type

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitConfigOverride, CircuitError, CircuitState, CircuitStats,
};
