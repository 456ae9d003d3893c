//! Startup choice between the network store and the in-process fallback.
//!
//! # Design Decisions
//! - Probed once: a failed probe pins the local cache for the process lifetime
//! - The probe is a PING under `connect_timeout_ms`, not guarded by the breaker
//! - No re-promotion to the remote store after a transient outage

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;

use crate::cache::backend::{CacheBackend, CacheError, CacheKind, CacheResult};
use crate::cache::local::LocalCache;
use crate::cache::remote::{create_pool, RemoteCache};
use crate::config::{LocalCacheConfig, RedisConfig};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreaker, CircuitConfigOverride};

/// The backend chosen at startup.
#[derive(Clone)]
pub enum SelectedBackend {
    Remote(Arc<RemoteCache>),
    Local(Arc<LocalCache>),
}

impl SelectedBackend {
    pub fn kind(&self) -> CacheKind {
        match self {
            SelectedBackend::Remote(_) => CacheKind::Remote,
            SelectedBackend::Local(_) => CacheKind::Local,
        }
    }

    /// Shared handle through the backend contract.
    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        match self {
            SelectedBackend::Remote(remote) => remote.clone() as Arc<dyn CacheBackend>,
            SelectedBackend::Local(local) => local.clone() as Arc<dyn CacheBackend>,
        }
    }

    /// The in-process cache, when that is what was selected.
    pub fn local(&self) -> Option<&Arc<LocalCache>> {
        match self {
            SelectedBackend::Local(local) => Some(local),
            SelectedBackend::Remote(_) => None,
        }
    }
}

/// Probes the network store and builds the matching backend.
pub struct BackendSelector {
    redis: RedisConfig,
    local: LocalCacheConfig,
    breaker: Arc<CircuitBreaker>,
    overrides: CircuitConfigOverride,
}

impl BackendSelector {
    pub fn new(
        redis: RedisConfig,
        local: LocalCacheConfig,
        breaker: Arc<CircuitBreaker>,
        overrides: CircuitConfigOverride,
    ) -> Self {
        Self {
            redis,
            local,
            breaker,
            overrides,
        }
    }

    /// Remote cache if the store answers a PING in time, local cache otherwise.
    pub async fn select(&self) -> SelectedBackend {
        if !self.redis.enabled {
            tracing::info!(max_entries = self.local.max_entries, "Redis disabled, using local cache");
            return self.local_backend();
        }

        match self.probe().await {
            Ok(pool) => {
                tracing::info!(url = %self.redis.url, "Connected to Redis, using remote cache");
                SelectedBackend::Remote(Arc::new(RemoteCache::new(
                    pool,
                    self.breaker.clone(),
                    self.overrides.clone(),
                    Duration::from_millis(self.redis.command_timeout_ms),
                )))
            }
            Err(e) => {
                tracing::warn!(
                    url = %self.redis.url,
                    error = %e,
                    "Redis unavailable, falling back to local cache for this process"
                );
                self.local_backend()
            }
        }
    }

    async fn probe(&self) -> CacheResult<Pool> {
        let pool = create_pool(&self.redis)?;
        let limit = Duration::from_millis(self.redis.connect_timeout_ms);
        let ping = async {
            let mut conn = pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), CacheError>(())
        };
        with_timeout(limit, ping).await??;
        Ok(pool)
    }

    fn local_backend(&self) -> SelectedBackend {
        SelectedBackend::Local(Arc::new(LocalCache::new(self.local.max_entries)))
    }
}
