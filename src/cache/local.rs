//! Bounded in-process cache.
//!
//! # Responsibilities
//! - Serve the full backend contract when no network store is reachable
//! - Evict least-recently-used keys past `max_entries`
//! - Expire entries lazily on access and in a periodic sweep
//!
//! # Design Decisions
//! - Scalar values and sets share one LRU behind one mutex, so set keys
//!   count toward the bound and `del`, `exists`, `ttl`, `expire` and
//!   `del_pattern` see both kinds
//! - A set emptied by `srem` disappears, as in Redis
//! - `incr`/`decr` accept only JSON integers; a numeric string is stored as
//!   quoted JSON text remotely and Redis would refuse it
//! - No circuit protection: nothing here can fail on the network

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cache::backend::{CacheBackend, CacheError, CacheKind, CacheResult, TTL_MISSING, TTL_NO_EXPIRY};
use crate::cache::pattern::glob_match;
use crate::observability::metrics;

const BACKEND: &str = "local";

#[derive(Debug, Clone)]
enum Data {
    Scalar(Value),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        !is_expired(self.expires_at, now)
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

fn deadline(ttl: Option<u64>, now: Instant) -> Option<Instant> {
    match ttl {
        Some(secs) if secs > 0 => Some(now + Duration::from_secs(secs)),
        _ => None,
    }
}

fn remaining_secs(expires_at: Option<Instant>, now: Instant) -> i64 {
    match expires_at {
        None => TTL_NO_EXPIRY,
        Some(at) => ((at.saturating_duration_since(now).as_millis() + 500) / 1000) as i64,
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType { key: key.to_string() }
}

type Entries = LruCache<String, Entry>;

/// In-process cache with LRU eviction and per-entry TTL.
pub struct LocalCache {
    entries: Mutex<Entries>,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Keys currently held, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        metrics::record_local_entries(entries.len());
        expired.len()
    }

    /// Periodically purge expired keys until shutdown is signalled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired local cache entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Local cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Live entry for `key`, promoted in the LRU. An expired entry is dropped.
    fn live<'a>(entries: &'a mut Entries, key: &str, now: Instant) -> Option<&'a mut Entry> {
        let expired = match entries.peek(key) {
            Some(e) => !e.is_live(now),
            None => return None,
        };
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get_mut(key)
    }

    /// Insert, counting an eviction when the bound pushed another key out.
    fn insert(entries: &mut Entries, key: &str, entry: Entry) {
        if let Some((old_key, _)) = entries.push(key.to_string(), entry) {
            if old_key != key {
                metrics::record_local_eviction();
                tracing::trace!(key = %old_key, "Evicted least recently used entry");
            }
        }
        metrics::record_local_entries(entries.len());
    }

    fn read(&self, key: &str, now: Instant) -> CacheResult<Option<Value>> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, now) {
            Some(Entry { data: Data::Scalar(v), .. }) => Ok(Some(v.clone())),
            Some(Entry { data: Data::Set(_), .. }) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: Value, expires_at: Option<Instant>) {
        let entry = Entry {
            data: Data::Scalar(value),
            expires_at,
        };
        Self::insert(&mut self.entries.lock(), key, entry);
    }

    fn adjust(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = Self::live(&mut entries, key, now) {
            let current = match &entry.data {
                Data::Scalar(Value::Number(n)) => n.as_i64(),
                Data::Scalar(_) => None,
                Data::Set(_) => return Err(wrong_type(key)),
            };
            let next = current
                .and_then(|n| n.checked_add(delta))
                .ok_or_else(|| CacheError::NotAnInteger { key: key.to_string() })?;
            entry.data = Data::Scalar(Value::from(next));
            return Ok(next);
        }

        let entry = Entry {
            data: Data::Scalar(Value::from(delta)),
            expires_at: None,
        };
        Self::insert(&mut entries, key, entry);
        Ok(delta)
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let value = self.read(key, Instant::now())?;
        metrics::record_cache_read(BACKEND, "get", value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<u64>) -> CacheResult<()> {
        self.write(key, value.clone(), deadline(ttl, Instant::now()));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let removed = entries.pop(key).map(|e| e.is_live(now)).unwrap_or(false);
        metrics::record_local_entries(entries.len());
        Ok(u64::from(removed))
    }

    async fn del_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0u64;
        for key in matching {
            if let Some(e) = entries.pop(&key) {
                if e.is_live(now) {
                    removed += 1;
                }
            }
        }
        metrics::record_local_entries(entries.len());
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<i64> {
        let mut entries = self.entries.lock();
        Ok(i64::from(Self::live(&mut entries, key, Instant::now()).is_some()))
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key, now) {
            Some(e) => remaining_secs(e.expires_at, now),
            None => TTL_MISSING,
        })
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| {
                // MGET answers nil for keys of another kind.
                let value = match Self::live(&mut entries, key, now) {
                    Some(Entry { data: Data::Scalar(v), .. }) => Some(v.clone()),
                    _ => None,
                };
                metrics::record_cache_read(BACKEND, "mget", value.is_some());
                value
            })
            .collect())
    }

    async fn mset(&self, items: &[(String, Value)], ttl: Option<u64>) -> CacheResult<()> {
        let expires_at = deadline(ttl, Instant::now());
        let mut entries = self.entries.lock();
        for (key, value) in items {
            let entry = Entry {
                data: Data::Scalar(value.clone()),
                expires_at,
            };
            Self::insert(&mut entries, key, entry);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.adjust(key, 1)
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.adjust(key, -1)
    }

    async fn expire(&self, key: &str, seconds: u64) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, now) {
            Some(e) => {
                e.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = Self::live(&mut entries, key, now) {
            let Data::Set(set) = &mut entry.data else {
                return Err(wrong_type(key));
            };
            let added = members.iter().filter(|m| set.insert((*m).clone())).count();
            return Ok(added as u64);
        }

        if members.is_empty() {
            return Ok(0);
        }
        let set: HashSet<String> = members.iter().cloned().collect();
        let added = set.len() as u64;
        let entry = Entry {
            data: Data::Set(set),
            expires_at: None,
        };
        Self::insert(&mut entries, key, entry);
        Ok(added)
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, Instant::now()) {
            Some(Entry { data: Data::Set(set), .. }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let mut entries = self.entries.lock();
        let (removed, emptied) = match Self::live(&mut entries, key, Instant::now()) {
            Some(Entry { data: Data::Set(set), .. }) => {
                let removed = members.iter().filter(|m| set.remove(*m)).count();
                (removed, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
            None => return Ok(0),
        };
        if emptied {
            entries.pop(key);
            metrics::record_local_entries(entries.len());
        }
        Ok(removed as u64)
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Local
    }
}
