//! Reverse-index invalidation end to end over the backend contract.

use std::sync::Arc;

use rbac_cache::cache::{BackendSelector, CacheBackend, LocalCache};
use rbac_cache::config::{LocalCacheConfig, RbacConfig, RedisConfig};
use rbac_cache::rbac::RbacCache;
use rbac_cache::resilience::{CircuitBreaker, CircuitConfigOverride};

mod common;

fn local_rbac() -> RbacCache {
    RbacCache::new(Arc::new(LocalCache::new(1_000)), &RbacConfig::default())
}

async fn invalidate_right_after_caching() {
    let rbac = local_rbac();
    let _ = rbac.set_user_roles("u1", &["admin", "editor"], Some(60)).await;
    let _ = rbac.set_user_roles("u2", &["editor"], Some(60)).await;

    assert_eq!(
        rbac.get_user_roles("u1").await,
        Some(vec!["admin".to_string(), "editor".to_string()])
    );
    assert_eq!(rbac.invalidate_role_users("editor").await, 2);

    assert_eq!(rbac.get_user_roles("u1").await, None);
    assert_eq!(rbac.get_user_roles("u2").await, None);
    assert!(rbac.backend().smembers("role:users:editor").await.unwrap().is_empty());
    assert!(rbac.backend().smembers("role:users:admin").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalidate_right_after_caching() {
    invalidate_right_after_caching().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalidate_right_after_caching_multi_thread() {
    for _ in 0..20 {
        invalidate_right_after_caching().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_then_permission_invalidation() {
    let rbac = local_rbac();
    let mut handles = Vec::new();
    for i in 0..50 {
        let rbac = rbac.clone();
        handles.push(tokio::spawn(async move {
            let _ = rbac
                .set_user_permissions(&format!("u{i}"), &["doc.read"], Some(60))
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(rbac.invalidate_permission_users("doc.read").await, 50);
    for i in 0..50 {
        assert_eq!(rbac.get_user_permissions(&format!("u{i}")).await, None);
    }
}

#[tokio::test]
async fn test_role_invalidation_clears_holders_only() {
    let rbac = local_rbac();
    rbac.set_user_roles("u1", &["admin", "editor"], None).await.wait().await;
    rbac.set_user_roles("u2", &["editor"], None).await.wait().await;
    rbac.set_user_roles("u3", &["viewer"], None).await.wait().await;
    rbac.set_user_permissions("u1", &["doc.write"], None).await.wait().await;

    assert_eq!(rbac.invalidate_role_users("editor").await, 2);

    assert_eq!(rbac.get_user_roles("u1").await, None);
    assert_eq!(rbac.get_user_permissions("u1").await, None);
    assert_eq!(rbac.get_user_roles("u2").await, None);
    assert_eq!(rbac.get_user_roles("u3").await, Some(vec!["viewer".to_string()]));

    let backend = rbac.backend();
    assert_eq!(backend.exists("role:users:editor").await.unwrap(), 0);
    assert!(backend.smembers("permission:users:doc.write").await.unwrap().is_empty());
    assert_eq!(backend.smembers("role:users:viewer").await.unwrap(), vec!["u3"]);

    // A second pass finds nothing left to do.
    assert_eq!(rbac.invalidate_role_users("editor").await, 0);
}

#[tokio::test]
async fn test_permission_invalidation() {
    let rbac = local_rbac();
    rbac.set_user_permissions("u1", &["doc.read", "doc.write"], None).await.wait().await;
    rbac.set_user_permissions("u2", &["doc.read"], None).await.wait().await;

    assert_eq!(rbac.invalidate_permission_users("doc.write").await, 1);
    assert_eq!(rbac.get_user_permissions("u1").await, None);
    assert_eq!(
        rbac.get_user_permissions("u2").await,
        Some(vec!["doc.read".to_string()])
    );
    assert_eq!(rbac.backend().smembers("permission:users:doc.read").await.unwrap(), vec!["u2"]);
}

#[tokio::test]
async fn test_multiple_roles_may_double_count() {
    let rbac = local_rbac();
    rbac.set_user_roles("u1", &["a"], None).await.wait().await;
    rbac.set_user_roles("u2", &["b"], None).await.wait().await;
    // u3 is re-cached between the two passes and is cleared by both.
    rbac.set_user_roles("u3", &["a"], None).await.wait().await;

    let first = rbac.invalidate_role_users("a").await;
    rbac.set_user_roles("u3", &["b"], None).await.wait().await;
    let second = rbac.invalidate_role_users("b").await;
    assert_eq!(first + second, 4);

    rbac.set_user_roles("u4", &["c"], None).await.wait().await;
    rbac.set_user_roles("u5", &["d"], None).await.wait().await;
    assert_eq!(rbac.invalidate_multiple_roles(&["c", "d", "missing"]).await, 2);
}

#[tokio::test]
async fn test_partial_failure_continues_with_other_users() {
    let flaky = Arc::new(common::FlakyBackend::new());
    let rbac = RbacCache::new(flaky.clone(), &RbacConfig::default());
    rbac.set_user_roles("u1", &["editor"], None).await.wait().await;
    rbac.set_user_roles("u2", &["editor"], None).await.wait().await;

    flaky.fail_key("user:roles:u1");

    assert_eq!(rbac.invalidate_role_users("editor").await, 1);
    assert!(flaky.failures() > 0);
    assert_eq!(rbac.get_user_roles("u2").await, None);
    // The index is dropped even though one member could not be cleared.
    assert_eq!(flaky.exists("role:users:editor").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_index_clears_nothing() {
    let flaky = Arc::new(common::FlakyBackend::new());
    let rbac = RbacCache::new(flaky.clone(), &RbacConfig::default());
    rbac.set_user_roles("u1", &["editor"], None).await.wait().await;

    flaky.fail_key("role:users:editor");

    assert_eq!(rbac.invalidate_role_users("editor").await, 0);
    assert_eq!(rbac.get_user_roles("u1").await, Some(vec!["editor".to_string()]));
}

#[tokio::test]
async fn test_failed_index_update_keeps_forward_entry() {
    let flaky = Arc::new(common::FlakyBackend::new());
    let rbac = RbacCache::new(flaky.clone(), &RbacConfig::default());
    flaky.fail_key("role:users:admin");

    rbac.set_user_roles("u1", &["admin"], None).await.wait().await;
    assert_eq!(rbac.get_user_roles("u1").await, Some(vec!["admin".to_string()]));
}

#[tokio::test]
async fn test_flush_leaves_foreign_keys() {
    let rbac = local_rbac();
    rbac.set_user_roles("u1", &["admin"], None).await.wait().await;
    rbac.set_user_permissions("u2", &["doc.read"], None).await.wait().await;
    rbac.backend()
        .set("session:abc", &serde_json::json!("token"), None)
        .await
        .unwrap();

    assert_eq!(rbac.flush_all_rbac_cache().await, 4);
    assert_eq!(rbac.get_user_roles("u1").await, None);
    assert_eq!(rbac.backend().exists("session:abc").await.unwrap(), 1);
}

#[tokio::test]
async fn test_selected_fallback_backend_serves_rbac() {
    let redis = RedisConfig {
        url: common::UNREACHABLE_REDIS.to_string(),
        connect_timeout_ms: 500,
        ..Default::default()
    };
    let selector = BackendSelector::new(
        redis,
        LocalCacheConfig::default(),
        Arc::new(CircuitBreaker::default()),
        CircuitConfigOverride::default(),
    );
    let selected = selector.select().await;
    let rbac = RbacCache::new(selected.backend(), &RbacConfig::default());

    rbac.set_user_roles("u1", &["admin"], Some(60)).await.wait().await;
    assert_eq!(rbac.get_user_roles("u1").await, Some(vec!["admin".to_string()]));
    assert_eq!(rbac.invalidate_role_users("admin").await, 1);
}
