//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Logging/metrics → Circuit breaker → Backend selection
//!     → Local sweeper (local backend only) → RBAC cache
//!
//! Shutdown (shutdown.rs):
//!     trigger() → background tasks observe the broadcast and exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: observability first so selection is logged
//! - Backend selection never fails startup; an unreachable store means local cache

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, CacheServices};
