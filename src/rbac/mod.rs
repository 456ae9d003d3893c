//! RBAC caching on top of the selected backend.
//!
//! # Data Flow
//! ```text
//! set_user_roles(user, roles)
//!     → user:roles:{user} written (TTL)
//!     → spawned: SADD role:users:{role} user, per role
//!
//! invalidate_role_users(role)
//!     → SMEMBERS role:users:{role}
//!     → delete_user_cache for each member, in bounded batches
//!     → DEL role:users:{role}
//! ```
//!
//! # Design Decisions
//! - Reverse indices make invalidation proportional to affected users,
//!   not to the keyspace
//! - Cache failures degrade to misses; callers always fall back to the
//!   system of record

pub mod cache;
pub mod invalidation;

pub use cache::{IndexKind, IndexUpdate, RbacCache};
