//! Bulk invalidation driven by the reverse indices.
//!
//! # Flow
//! ```text
//! invalidate_role_users(code)
//!     → wait for index writes to role:users:{code} still in flight
//!     → SMEMBERS role:users:{code}        (empty → nothing to do)
//!     → chunks of `batch_size` users
//!         → delete_user_cache for the chunk, concurrently
//!         → next chunk only after the whole chunk settled
//!     → DEL role:users:{code}
//! ```
//!
//! # Design Decisions
//! - A user whose clear fails is logged and skipped; the batch and the
//!   following batches still run, without retries
//! - Batch size bounds concurrent backend calls so a large role does not
//!   drain the connection pool
//! - Returned counts are metrics, not set cardinalities: a user present in
//!   several invalidated roles is counted once per role

use futures_util::future::join_all;

use crate::cache::keys;
use crate::observability::metrics;
use crate::rbac::cache::{IndexKind, RbacCache};

impl RbacCache {
    /// Clear every user cached with `role_code`; returns users cleared.
    pub async fn invalidate_role_users(&self, role_code: &str) -> usize {
        self.invalidate_index(IndexKind::Role, role_code).await
    }

    /// Clear every user cached with `permission_code`; returns users cleared.
    pub async fn invalidate_permission_users(&self, permission_code: &str) -> usize {
        self.invalidate_index(IndexKind::Permission, permission_code).await
    }

    /// Invalidate roles one after another; the total may count a user more than once.
    pub async fn invalidate_multiple_roles<S: AsRef<str>>(&self, role_codes: &[S]) -> usize {
        let mut total = 0;
        for code in role_codes {
            total += self.invalidate_role_users(code.as_ref()).await;
        }
        total
    }

    /// Invalidate permissions one after another; the total may count a user more than once.
    pub async fn invalidate_multiple_permissions<S: AsRef<str>>(&self, permission_codes: &[S]) -> usize {
        let mut total = 0;
        for code in permission_codes {
            total += self.invalidate_permission_users(code.as_ref()).await;
        }
        total
    }

    /// Pattern-delete every RBAC key family. Walks the whole keyspace.
    pub async fn flush_all_rbac_cache(&self) -> u64 {
        self.settle_all_indices().await;
        let families = [
            keys::USER_ROLES,
            keys::USER_PERMISSIONS,
            keys::ROLE_USERS,
            keys::PERMISSION_USERS,
        ];

        let mut removed = 0;
        for prefix in families {
            let pattern = keys::family_pattern(prefix);
            match self.backend.del_pattern(&pattern).await {
                Ok(n) => removed += n,
                Err(e) => tracing::error!(pattern = %pattern, error = %e, "Failed to flush RBAC keys"),
            }
        }

        tracing::warn!(removed, "Flushed all RBAC cache entries");
        metrics::record_invalidated_users("flush", removed as usize);
        removed
    }

    async fn invalidate_index(&self, kind: IndexKind, code: &str) -> usize {
        let index_key = kind.index_key(code);
        self.settle_index(&index_key).await;
        let users = match self.backend.smembers(&index_key).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(key = %index_key, error = %e, "Failed to read reverse index");
                return 0;
            }
        };
        if users.is_empty() {
            tracing::debug!(key = %index_key, "No cached users to invalidate");
            return 0;
        }

        let mut cleared = 0;
        for (batch_no, batch) in users.chunks(self.batch_size).enumerate() {
            let results = join_all(batch.iter().map(|user| self.try_delete_user_cache(user))).await;
            for (user, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => cleared += 1,
                    Err(e) => tracing::warn!(
                        key = %index_key,
                        user_id = %user,
                        batch = batch_no,
                        error = %e,
                        "Failed to clear user during invalidation"
                    ),
                }
            }
        }

        if let Err(e) = self.backend.del(&index_key).await {
            tracing::warn!(key = %index_key, error = %e, "Failed to delete reverse index");
        }

        tracing::info!(
            kind = kind.as_str(),
            code = %code,
            affected = users.len(),
            cleared,
            "Invalidated cached users"
        );
        metrics::record_invalidated_users(kind.as_str(), cleared);
        cleared
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cache::{CacheBackend, LocalCache};
    use crate::config::RbacConfig;
    use crate::rbac::RbacCache;

    fn rbac_with_batch(batch: usize) -> RbacCache {
        let config = RbacConfig {
            invalidation_batch_size: batch,
            ..Default::default()
        };
        RbacCache::new(Arc::new(LocalCache::new(1_000)), &config)
    }

    #[tokio::test]
    async fn test_invalidate_role_users() {
        let cache = rbac_with_batch(100);
        cache.set_user_roles("u1", &["admin", "editor"], Some(60)).await.wait().await;
        cache.set_user_roles("u2", &["editor"], Some(60)).await.wait().await;

        assert_eq!(cache.invalidate_role_users("editor").await, 2);
        assert_eq!(cache.get_user_roles("u1").await, None);
        assert_eq!(cache.get_user_roles("u2").await, None);
        assert!(cache.backend().smembers("role:users:editor").await.unwrap().is_empty());
        assert!(cache.backend().smembers("role:users:admin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_waits_for_pending_index_writes() {
        let cache = rbac_with_batch(100);
        let _ = cache.set_user_roles("u1", &["admin", "editor"], Some(60)).await;
        let _ = cache.set_user_roles("u2", &["editor"], Some(60)).await;

        assert_eq!(cache.invalidate_role_users("editor").await, 2);
        assert_eq!(cache.get_user_roles("u1").await, None);
        assert_eq!(cache.get_user_roles("u2").await, None);
        assert!(cache.backend().smembers("role:users:editor").await.unwrap().is_empty());

        // u1's "admin" write was settled by the delete, so no member lingers.
        tokio::task::yield_now().await;
        assert!(cache.backend().smembers("role:users:admin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_unknown_role_is_noop() {
        let cache = rbac_with_batch(100);
        cache.set_user_roles("u1", &["admin"], Some(60)).await.wait().await;

        assert_eq!(cache.invalidate_role_users("nobody-has-this").await, 0);
        assert!(cache.get_user_roles("u1").await.is_some());
    }

    #[tokio::test]
    async fn test_batches_cover_every_user() {
        let cache = rbac_with_batch(3);
        for i in 0..10 {
            cache
                .set_user_permissions(&format!("u{i}"), &["doc.read"], Some(60))
                .await
                .wait()
                .await;
        }

        assert_eq!(cache.invalidate_permission_users("doc.read").await, 10);
        for i in 0..10 {
            assert_eq!(cache.get_user_permissions(&format!("u{i}")).await, None);
        }
        assert_eq!(cache.backend().exists("permission:users:doc.read").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_members_are_tolerated() {
        let cache = rbac_with_batch(100);
        cache.set_user_roles("u1", &["editor"], Some(60)).await.wait().await;
        // Forward entry gone (as after TTL expiry), reverse membership left behind.
        cache.backend().del("user:roles:u1").await.unwrap();

        assert_eq!(cache.invalidate_role_users("editor").await, 1);
        assert_eq!(cache.backend().exists("role:users:editor").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multiple_roles_count_per_role() {
        let cache = rbac_with_batch(100);
        cache.set_user_roles("u1", &["admin", "editor"], Some(60)).await.wait().await;
        cache.set_user_roles("u2", &["viewer"], Some(60)).await.wait().await;

        // u1 is cleared by "admin"; its "editor" membership goes with it.
        assert_eq!(cache.invalidate_multiple_roles(&["admin", "editor", "viewer"]).await, 2);
        assert_eq!(cache.get_user_roles("u1").await, None);
        assert_eq!(cache.get_user_roles("u2").await, None);
    }

    #[tokio::test]
    async fn test_multiple_permissions() {
        let cache = rbac_with_batch(100);
        cache.set_user_permissions("u1", &["a"], Some(60)).await.wait().await;
        cache.set_user_permissions("u2", &["b"], Some(60)).await.wait().await;

        assert_eq!(cache.invalidate_multiple_permissions(&["a", "b"]).await, 2);
    }

    #[tokio::test]
    async fn test_flush_waits_for_pending_index_writes() {
        let cache = rbac_with_batch(100);
        let _ = cache.set_user_permissions("u1", &["doc.read", "doc.write"], Some(60)).await;

        assert_eq!(cache.flush_all_rbac_cache().await, 3);
        tokio::task::yield_now().await;
        assert_eq!(cache.backend().exists("permission:users:doc.read").await.unwrap(), 0);
        assert_eq!(cache.backend().exists("permission:users:doc.write").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_all() {
        let cache = rbac_with_batch(100);
        cache.set_user_roles("u1", &["admin"], Some(60)).await.wait().await;
        cache.set_user_permissions("u1", &["doc.read"], Some(60)).await.wait().await;
        cache.backend().set("unrelated", &serde_json::json!(1), None).await.unwrap();

        assert_eq!(cache.flush_all_rbac_cache().await, 4);
        assert_eq!(cache.get_user_roles("u1").await, None);
        assert_eq!(cache.get_user_permissions("u1").await, None);
        assert_eq!(cache.backend().exists("unrelated").await.unwrap(), 1);
    }
}
