//! Redis-backed cache guarded by the `cache` circuit.
//!
//! # Responsibilities
//! - Map the backend contract onto Redis commands
//! - Route every command through the circuit breaker with a deadline
//! - Serve a per-operation degraded default while the circuit is open
//!
//! # Design Decisions
//! - Values are stored as JSON text so they round-trip exactly
//! - Only `CircuitError::Open` is absorbed; a command that actually ran and
//!   failed is returned to the caller after the breaker counted it
//! - JSON decoding happens outside the breaker: a bad payload is not a
//!   network failure

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolSettings, Connection, Pool, PoolConfig, Runtime};
use redis::{AsyncCommands, RedisResult};
use serde_json::Value;

use crate::cache::backend::{CacheBackend, CacheError, CacheKind, CacheResult, TTL_MISSING};
use crate::config::RedisConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreaker, CircuitConfigOverride, CircuitError, CircuitState};

/// Circuit name shared by every remote cache command.
pub const CACHE_CIRCUIT: &str = "cache";

const BACKEND: &str = "remote";
const SCAN_COUNT: u64 = 500;
/// Deadline for SCAN-driven pattern deletes, which touch many keys.
const BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a connection pool without connecting.
pub fn create_pool(config: &RedisConfig) -> CacheResult<Pool> {
    let mut settings = PoolSettings::from_url(config.url.clone());
    settings.pool = Some(PoolConfig::new(config.pool_size));
    settings
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Pool(e.to_string()))
}

/// Network-backed cache.
#[derive(Clone)]
pub struct RemoteCache {
    pool: Pool,
    breaker: Arc<CircuitBreaker>,
    overrides: CircuitConfigOverride,
    command_timeout: Duration,
}

impl RemoteCache {
    pub fn new(
        pool: Pool,
        breaker: Arc<CircuitBreaker>,
        overrides: CircuitConfigOverride,
        command_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            breaker,
            overrides,
            command_timeout,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        degraded: T,
        limit: Duration,
        command: F,
    ) -> CacheResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let pool = &self.pool;
        let result = self
            .breaker
            .execute_with_config(CACHE_CIRCUIT, &self.overrides, move || {
                run_command(pool, limit, command)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitError::Open { .. }) => {
                metrics::record_degraded(op);
                tracing::debug!(op, "Cache circuit open, serving degraded default");
                Ok(degraded)
            }
            Err(CircuitError::Operation(e)) => {
                tracing::warn!(op, error = %e, "Cache command failed");
                Err(e)
            }
        }
    }
}

async fn run_command<T, F, Fut>(pool: &Pool, limit: Duration, command: F) -> CacheResult<T>
where
    F: FnOnce(Connection) -> Fut,
    Fut: Future<Output = RedisResult<T>>,
{
    let work = async move {
        let conn = pool.get().await?;
        command(conn).await.map_err(CacheError::from)
    };
    match with_timeout(limit, work).await {
        Ok(result) => result,
        Err(elapsed) => Err(elapsed.into()),
    }
}

fn decode(raw: Option<String>) -> CacheResult<Option<Value>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(CacheError::from)
}

#[async_trait]
impl CacheBackend for RemoteCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let raw: Option<String> = self
            .call("get", None, self.command_timeout, |mut conn| async move {
                conn.get(key).await
            })
            .await?;
        metrics::record_cache_read(BACKEND, "get", raw.is_some());
        decode(raw)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<u64>) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;
        self.call("set", (), self.command_timeout, |mut conn| async move {
            match ttl {
                Some(secs) if secs > 0 => conn.set_ex(key, payload, secs).await,
                _ => conn.set(key, payload).await,
            }
        })
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.call("del", 0, self.command_timeout, |mut conn| async move {
            conn.del(key).await
        })
        .await
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.call("del_pattern", 0, BULK_TIMEOUT, |mut conn| async move {
            let mut cursor: u64 = 0;
            let mut removed: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let n: u64 = conn.del(keys).await?;
                    removed += n;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<u64, redis::RedisError>(removed)
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<i64> {
        self.call("exists", 0, self.command_timeout, |mut conn| async move {
            conn.exists(key).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.call("ttl", TTL_MISSING, self.command_timeout, |mut conn| async move {
            conn.ttl(key).await
        })
        .await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        let degraded = vec![None; keys.len()];
        let raw: Vec<Option<String>> = self
            .call("mget", degraded, self.command_timeout, |mut conn| async move {
                redis::cmd("MGET").arg(keys).query_async(&mut conn).await
            })
            .await?;
        for slot in &raw {
            metrics::record_cache_read(BACKEND, "mget", slot.is_some());
        }
        raw.into_iter().map(decode).collect()
    }

    async fn mset(&self, entries: &[(String, Value)], ttl: Option<u64>) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let payload = serde_json::to_string(value)?;
            match ttl {
                Some(secs) if secs > 0 => pipe.set_ex(key, payload, secs).ignore(),
                _ => pipe.set(key, payload).ignore(),
            };
        }
        self.call("mset", (), self.command_timeout, |mut conn| async move {
            let _: () = pipe.query_async(&mut conn).await?;
            Ok::<(), redis::RedisError>(())
        })
        .await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.call("incr", 0, self.command_timeout, |mut conn| async move {
            conn.incr(key, 1).await
        })
        .await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.call("decr", 0, self.command_timeout, |mut conn| async move {
            conn.decr(key, 1).await
        })
        .await
    }

    async fn expire(&self, key: &str, seconds: u64) -> CacheResult<i64> {
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        self.call("expire", 0, self.command_timeout, |mut conn| async move {
            conn.expire(key, seconds).await
        })
        .await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let members = members.to_vec();
        self.call("sadd", 0, self.command_timeout, |mut conn| async move {
            conn.sadd(key, members).await
        })
        .await
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.call("smembers", Vec::new(), self.command_timeout, |mut conn| async move {
            conn.smembers(key).await
        })
        .await
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let members = members.to_vec();
        self.call("srem", 0, self.command_timeout, |mut conn| async move {
            conn.srem(key, members).await
        })
        .await
    }

    /// False while the circuit is open or a PING does not answer in time.
    /// The probe bypasses the breaker so health checks do not skew its counters.
    async fn is_available(&self) -> bool {
        if self.breaker.get_state(CACHE_CIRCUIT) == CircuitState::Open {
            return false;
        }
        let ping = run_command(&self.pool, self.command_timeout, |mut conn| async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<String, redis::RedisError>(pong)
        });
        ping.await.is_ok()
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Remote
    }
}
