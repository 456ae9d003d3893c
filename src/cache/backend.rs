//! Cache backend contract shared by the remote and local stores.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::singleflight::Flight;
use crate::resilience::timeouts::Elapsed;
use crate::resilience::CircuitError;

/// `ttl()` reply for a key that exists without an expiry.
pub const TTL_NO_EXPIRY: i64 = -1;

/// `ttl()` reply for a key that does not exist.
pub const TTL_MISSING: i64 = -2;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The breaker guarding the store refused the call.
    #[error("cache circuit is open")]
    CircuitOpen,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("cache command timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value at '{key}' is not an integer")]
    NotAnInteger { key: String },

    #[error("key '{key}' holds the wrong kind of value")]
    WrongType { key: String },
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::Pool(e.to_string())
    }
}

impl From<Elapsed> for CacheError {
    fn from(e: Elapsed) -> Self {
        CacheError::Timeout(e.0)
    }
}

/// For callers running their own cache calls under a breaker.
impl From<CircuitError<CacheError>> for CacheError {
    fn from(e: CircuitError<CacheError>) -> Self {
        match e {
            CircuitError::Open { .. } => CacheError::CircuitOpen,
            CircuitError::Operation(inner) => inner,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Which store is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Remote,
    Local,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Remote => "remote",
            CacheKind::Local => "local",
        }
    }
}

/// Key/value and set primitives with Redis reply semantics.
///
/// Integer replies keep their literal meaning: `exists` and `expire` answer
/// `0` or `1`, `ttl` answers seconds, [`TTL_NO_EXPIRY`] or [`TTL_MISSING`].
/// TTL arguments are whole seconds.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    async fn set(&self, key: &str, value: &Value, ttl: Option<u64>) -> CacheResult<()>;

    /// Number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> CacheResult<u64>;

    /// Remove every key matching a Redis glob; returns the number removed.
    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<i64>;

    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// One slot per requested key, `None` for misses.
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>>;

    async fn mset(&self, entries: &[(String, Value)], ttl: Option<u64>) -> CacheResult<()>;

    async fn incr(&self, key: &str) -> CacheResult<i64>;

    async fn decr(&self, key: &str) -> CacheResult<i64>;

    async fn expire(&self, key: &str, seconds: u64) -> CacheResult<i64>;

    /// Number of members newly added.
    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Number of members actually removed.
    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn is_available(&self) -> bool;

    fn kind(&self) -> CacheKind;
}

/// Typed and read-through helpers available on every backend.
#[async_trait]
pub trait CacheBackendExt: CacheBackend {
    async fn get_json<T>(&self, key: &str) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, &value, ttl).await
    }

    /// Return the cached value, or compute it with `factory`, store it and return it.
    ///
    /// Cache failures never fail the call: a broken read is treated as a miss
    /// and a broken write only logs. The factory's error is returned as is.
    async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Option<u64>, factory: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(hit) = read_through_hit(self, key).await {
            return Ok(hit);
        }
        let value = factory().await?;
        store_computed(self, key, &value, ttl).await;
        Ok(value)
    }

    /// Like [`get_or_set`](Self::get_or_set), but concurrent misses for the
    /// same key in this process run the factory once; later waiters re-read
    /// the cache after the first one stored its value.
    async fn get_or_set_coalesced<T, E, F, Fut>(
        &self,
        flight: &Flight,
        key: &str,
        ttl: Option<u64>,
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(hit) = read_through_hit(self, key).await {
            return Ok(hit);
        }
        let _guard = flight.acquire(key).await;
        if let Some(hit) = read_through_hit(self, key).await {
            return Ok(hit);
        }
        let value = factory().await?;
        store_computed(self, key, &value, ttl).await;
        Ok(value)
    }
}

impl<B: CacheBackend + ?Sized> CacheBackendExt for B {}

async fn read_through_hit<B, T>(backend: &B, key: &str) -> Option<T>
where
    B: CacheBackend + ?Sized,
    T: DeserializeOwned + Send,
{
    match backend.get_json(key).await {
        Ok(hit) => hit,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed, computing value");
            None
        }
    }
}

async fn store_computed<B, T>(backend: &B, key: &str, value: &T, ttl: Option<u64>)
where
    B: CacheBackend + ?Sized,
    T: Serialize + Sync,
{
    if let Err(e) = backend.set_json(key, value, ttl).await {
        tracing::warn!(key = %key, error = %e, "Failed to store computed value");
    }
}
