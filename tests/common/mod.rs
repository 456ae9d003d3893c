//! Shared fixtures for integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use rbac_cache::cache::remote::create_pool;
use rbac_cache::cache::{CacheBackend, CacheError, CacheKind, CacheResult, LocalCache, RemoteCache};
use rbac_cache::config::RedisConfig;
use rbac_cache::resilience::{CircuitBreaker, CircuitConfig, CircuitConfigOverride};

/// Nothing listens here; pool creation is lazy so every command fails fast.
pub const UNREACHABLE_REDIS: &str = "redis://127.0.0.1:1";

/// Remote cache pointed at a dead address, with its own breaker.
#[allow(dead_code)]
pub fn unreachable_remote(defaults: CircuitConfig) -> (RemoteCache, Arc<CircuitBreaker>) {
    let redis = RedisConfig {
        url: UNREACHABLE_REDIS.to_string(),
        pool_size: 2,
        ..Default::default()
    };
    let pool = create_pool(&redis).unwrap();
    let breaker = Arc::new(CircuitBreaker::new(defaults));
    let remote = RemoteCache::new(
        pool,
        breaker.clone(),
        CircuitConfigOverride::default(),
        Duration::from_millis(500),
    );
    (remote, breaker)
}

/// Local cache that fails every operation touching a chosen key.
#[allow(dead_code)]
pub struct FlakyBackend {
    inner: LocalCache,
    failing: Mutex<HashSet<String>>,
    failures: AtomicU32,
}

#[allow(dead_code)]
impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: LocalCache::new(1_000),
            failing: Mutex::new(HashSet::new()),
            failures: AtomicU32::new(0),
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    /// Failures injected so far.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> CacheResult<()> {
        if self.failing.lock().contains(key) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Timeout(Duration::from_millis(1)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<u64>) -> CacheResult<()> {
        self.check(key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.check(key)?;
        self.inner.del(key).await
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.inner.del_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> CacheResult<i64> {
        self.check(key)?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.check(key)?;
        self.inner.ttl(key).await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        for key in keys {
            self.check(key)?;
        }
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &[(String, Value)], ttl: Option<u64>) -> CacheResult<()> {
        for (key, _) in entries {
            self.check(key)?;
        }
        self.inner.mset(entries, ttl).await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.check(key)?;
        self.inner.incr(key).await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.check(key)?;
        self.inner.decr(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> CacheResult<i64> {
        self.check(key)?;
        self.inner.expire(key, seconds).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.check(key)?;
        self.inner.sadd(key, members).await
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check(key)?;
        self.inner.smembers(key).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.check(key)?;
        self.inner.srem(key, members).await
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Local
    }
}
