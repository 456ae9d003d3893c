//! Resilient RBAC caching layer.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller
//!       │  set_user_roles / get_user_permissions / invalidate_role_users
//!       ▼
//!  ┌──────────────┐      ┌──────────────────────────────────────────┐
//!  │  RbacCache   │─────▶│  dyn CacheBackend (chosen once at start) │
//!  │ (rbac/)      │      │                                          │
//!  └──────────────┘      │   RemoteCache ──▶ CircuitBreaker ──▶ Redis│
//!                        │        or                                │
//!                        │   LocalCache (LRU + TTL, in process)     │
//!                        └──────────────────────────────────────────┘
//!
//!  Cross-cutting: config (TOML), observability (tracing + metrics),
//!  health (backend + circuit report), lifecycle (startup/shutdown)
//! ```

pub mod cache;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod rbac;
pub mod resilience;

pub use cache::{BackendSelector, CacheBackend, CacheBackendExt, CacheError, LocalCache, RemoteCache};
pub use config::ServiceConfig;
pub use lifecycle::{CacheServices, Shutdown};
pub use rbac::RbacCache;
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
