//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and the optional metrics exporter
//! - Build the shared circuit breaker from configuration
//! - Select the cache backend and start its housekeeping
//! - Hand back the wired RBAC cache
//!
//! # Design Decisions
//! - Configuration is validated by the loader, before this runs
//! - Subsystems initialize in order, not concurrently
//! - A bad metrics address is logged, never fatal

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cache::{BackendSelector, SelectedBackend};
use crate::config::ServiceConfig;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::rbac::RbacCache;
use crate::resilience::{CircuitBreaker, CircuitConfig, CircuitConfigOverride};

/// Everything a caller needs after startup.
pub struct CacheServices {
    pub breaker: Arc<CircuitBreaker>,
    pub selected: SelectedBackend,
    pub rbac: RbacCache,
    pub shutdown: Shutdown,
    sweeper: Option<JoinHandle<()>>,
}

impl CacheServices {
    /// Signal background tasks and wait for the sweeper to exit.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.sweeper.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Local cache sweeper did not exit cleanly");
            }
        }
        tracing::info!("Cache services stopped");
    }
}

/// Wire the cache stack described by `config`.
pub async fn start(config: &ServiceConfig) -> CacheServices {
    logging::init(&config.observability);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let breaker = Arc::new(CircuitBreaker::new(CircuitConfig::from(&config.circuit_breaker)));
    let overrides = CircuitConfigOverride::from(&config.circuit_breaker.cache);

    let selector = BackendSelector::new(
        config.redis.clone(),
        config.local_cache.clone(),
        breaker.clone(),
        overrides,
    );
    let selected = selector.select().await;

    let shutdown = Shutdown::new();
    let sweeper = match selected.local() {
        Some(local) if config.local_cache.sweep_interval_secs > 0 => {
            let interval = Duration::from_secs(config.local_cache.sweep_interval_secs);
            Some(local.clone().spawn_sweeper(interval, shutdown.subscribe()))
        }
        _ => None,
    };

    let rbac = RbacCache::new(selected.backend(), &config.rbac);

    tracing::info!(
        backend = selected.kind().as_str(),
        default_ttl_secs = config.rbac.default_ttl_secs,
        "RBAC cache ready"
    );

    CacheServices {
        breaker,
        selected,
        rbac,
        shutdown,
        sweeper,
    }
}
