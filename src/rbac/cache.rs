//! Per-user role and permission cache with reverse indices.
//!
//! # Key Layout
//! ```text
//! user:roles:{user}            → JSON array of role codes (TTL)
//! user:permissions:{user}      → JSON array of permission codes (TTL)
//! role:users:{role}            → set of user ids
//! permission:users:{perm}      → set of user ids
//! ```
//!
//! # Design Decisions
//! - Forward entries are written on the caller's path; reverse-index
//!   membership is written by a spawned task and only logged on failure
//! - Spawned index writes are tracked per reverse-index key until they
//!   finish; invalidation settles the writes for its key before reading it,
//!   so a user cached just before an invalidation is always cleared by it
//! - Reverse sets carry no TTL: members whose forward entry expired stay
//!   behind as orphans and are tolerated by invalidation
//! - Nothing here returns a backend error; failures are logged and the
//!   caller sees a cache miss at worst

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::cache::keys;
use crate::cache::{CacheBackend, CacheBackendExt, CacheKind, CacheResult};
use crate::config::RbacConfig;

/// Which reverse index a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Role,
    Permission,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Role => "role",
            IndexKind::Permission => "permission",
        }
    }

    pub(crate) fn index_key(&self, code: &str) -> String {
        match self {
            IndexKind::Role => keys::role_users(code),
            IndexKind::Permission => keys::permission_users(code),
        }
    }

    fn forward_key(&self, user_id: &str) -> String {
        match self {
            IndexKind::Role => keys::user_roles(user_id),
            IndexKind::Permission => keys::user_permissions(user_id),
        }
    }
}

type IndexWrite = Shared<BoxFuture<'static, ()>>;

/// Handle to background reverse-index housekeeping.
///
/// Dropping it lets the work finish on its own; invalidation waits for it
/// anyway. `wait` is for callers that need the index settled right now.
pub struct IndexUpdate {
    write: Option<IndexWrite>,
}

impl std::fmt::Debug for IndexUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settled = self.write.as_ref().map_or(true, |w| w.peek().is_some());
        f.debug_struct("IndexUpdate").field("settled", &settled).finish()
    }
}

impl IndexUpdate {
    fn none() -> Self {
        Self { write: None }
    }

    pub async fn wait(self) {
        if let Some(write) = self.write {
            write.await;
        }
    }
}

/// Index writes still in flight, keyed by reverse-index key. Finished
/// writes are pruned on the next write to the same key; the key set is
/// bounded by the number of role and permission codes.
#[derive(Default)]
struct PendingIndexWrites {
    writes: DashMap<String, Vec<IndexWrite>>,
}

impl PendingIndexWrites {
    fn track(&self, index_key: String, write: &IndexWrite) {
        let mut pending = self.writes.entry(index_key).or_default();
        pending.retain(|w| w.peek().is_none());
        pending.push(write.clone());
    }

    /// Wait for every write to `index_key` registered so far.
    async fn settle(&self, index_key: &str) {
        let pending = match self.writes.remove(index_key) {
            Some((_, pending)) => pending,
            None => return,
        };
        for write in pending {
            write.await;
        }
    }

    async fn settle_all(&self) {
        let keys: Vec<String> = self.writes.iter().map(|r| r.key().clone()).collect();
        for key in keys {
            self.settle(&key).await;
        }
    }
}

/// Role/permission cache built on any [`CacheBackend`].
#[derive(Clone)]
pub struct RbacCache {
    pub(crate) backend: Arc<dyn CacheBackend>,
    default_ttl: u64,
    pub(crate) batch_size: usize,
    pending: Arc<PendingIndexWrites>,
}

impl RbacCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &RbacConfig) -> Self {
        if backend.kind() == CacheKind::Local {
            tracing::warn!(
                "RBAC cache is using the local backend; other processes will not see \
                 these entries or their invalidations"
            );
        }
        Self {
            backend,
            default_ttl: config.default_ttl_secs,
            batch_size: config.invalidation_batch_size.max(1),
            pending: Arc::new(PendingIndexWrites::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Cache a user's roles (order kept, duplicates dropped) and index them.
    pub async fn set_user_roles<S: AsRef<str>>(
        &self,
        user_id: &str,
        roles: &[S],
        ttl: Option<u64>,
    ) -> IndexUpdate {
        self.set_entry(IndexKind::Role, user_id, roles, ttl).await
    }

    /// Cache a user's permissions (duplicates dropped) and index them.
    pub async fn set_user_permissions<S: AsRef<str>>(
        &self,
        user_id: &str,
        permissions: &[S],
        ttl: Option<u64>,
    ) -> IndexUpdate {
        self.set_entry(IndexKind::Permission, user_id, permissions, ttl).await
    }

    pub async fn get_user_roles(&self, user_id: &str) -> Option<Vec<String>> {
        self.get_entry(IndexKind::Role, user_id).await
    }

    pub async fn get_user_permissions(&self, user_id: &str) -> Option<Vec<String>> {
        self.get_entry(IndexKind::Permission, user_id).await
    }

    /// Remove a user's entries and their reverse-index memberships.
    /// Returns false if any step failed (already logged).
    pub async fn delete_user_cache(&self, user_id: &str) -> bool {
        match self.try_delete_user_cache(user_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to clear user cache");
                false
            }
        }
    }

    /// Read-then-delete without a transaction: a concurrent `set_*` between
    /// the read and the deletes can leave a stale reverse-index member.
    pub(crate) async fn try_delete_user_cache(&self, user_id: &str) -> CacheResult<()> {
        let roles = self.read_codes(IndexKind::Role, user_id).await;
        let permissions = self.read_codes(IndexKind::Permission, user_id).await;
        for role in &roles {
            self.settle_index(&keys::role_users(role)).await;
        }
        for permission in &permissions {
            self.settle_index(&keys::permission_users(permission)).await;
        }

        let mut first_error = None;
        let mut note = |result: CacheResult<u64>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        note(self.backend.del(&keys::user_roles(user_id)).await);
        note(self.backend.del(&keys::user_permissions(user_id)).await);

        let member = [user_id.to_string()];
        for role in &roles {
            note(self.backend.srem(&keys::role_users(role), &member).await);
        }
        for permission in &permissions {
            note(self.backend.srem(&keys::permission_users(permission), &member).await);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn set_entry<S: AsRef<str>>(
        &self,
        kind: IndexKind,
        user_id: &str,
        codes: &[S],
        ttl: Option<u64>,
    ) -> IndexUpdate {
        let codes = dedup(codes);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = kind.forward_key(user_id);

        if let Err(e) = self.backend.set_json(&key, &codes, Some(ttl)).await {
            tracing::warn!(key = %key, error = %e, "Failed to cache user entry");
            return IndexUpdate::none();
        }
        if codes.is_empty() {
            return IndexUpdate::none();
        }

        let index_keys: Vec<String> = codes.iter().map(|code| kind.index_key(code)).collect();
        let backend = self.backend.clone();
        let member = [user_id.to_string()];
        let targets = index_keys.clone();
        let handle = tokio::spawn(async move {
            for index_key in &targets {
                if let Err(e) = backend.sadd(index_key, &member).await {
                    tracing::warn!(
                        key = %index_key,
                        user_id = %member[0],
                        error = %e,
                        "Failed to update reverse index"
                    );
                }
            }
        });

        let write: IndexWrite = async move {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Reverse index task failed to complete");
            }
        }
        .boxed()
        .shared();
        for index_key in index_keys {
            self.pending.track(index_key, &write);
        }
        IndexUpdate { write: Some(write) }
    }

    /// Wait for in-flight index writes to `index_key` before reading it.
    pub(crate) async fn settle_index(&self, index_key: &str) {
        self.pending.settle(index_key).await;
    }

    pub(crate) async fn settle_all_indices(&self) {
        self.pending.settle_all().await;
    }

    async fn get_entry(&self, kind: IndexKind, user_id: &str) -> Option<Vec<String>> {
        let key = kind.forward_key(user_id);
        let entry: CacheResult<Option<Vec<String>>> = self.backend.get_json(&key).await;
        match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read user entry");
                None
            }
        }
    }

    async fn read_codes(&self, kind: IndexKind, user_id: &str) -> Vec<String> {
        self.get_entry(kind, user_id).await.unwrap_or_default()
    }
}

fn dedup<S: AsRef<str>>(codes: &[S]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(codes.len());
    codes
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| seen.insert(*c))
        .map(str::to_string)
        .collect()
}
