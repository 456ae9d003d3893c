//! Cache health reporting.
//!
//! # Data Flow
//! ```text
//! report(backend, breaker)
//!     → backend.is_available()   (remote: circuit state + PING)
//!     → breaker.all_stats()
//!     → CacheHealthReport        (serialized by the admin CLI)
//! ```

use serde::Serialize;

use crate::cache::{CacheBackend, CacheKind};
use crate::resilience::{CircuitBreaker, CircuitState, CircuitStats};

/// Snapshot of the serving backend and every circuit seen so far.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealthReport {
    pub backend: CacheKind,
    pub available: bool,
    pub circuits: Vec<CircuitStats>,
}

impl CacheHealthReport {
    /// Healthy when the backend answers and no circuit is open.
    pub fn is_healthy(&self) -> bool {
        self.available && self.circuits.iter().all(|c| c.state != CircuitState::Open)
    }
}

pub async fn report(backend: &dyn CacheBackend, breaker: &CircuitBreaker) -> CacheHealthReport {
    let available = backend.is_available().await;
    let circuits = breaker.all_stats();
    if !available {
        tracing::warn!(backend = backend.kind().as_str(), "Cache backend unavailable");
    }
    CacheHealthReport {
        backend: backend.kind(),
        available,
        circuits,
    }
}
