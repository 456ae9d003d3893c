//! Cache backends.
//!
//! # Data Flow
//! ```text
//! startup:
//!     selector.rs → PING the network store
//!         ok   → remote.rs (Redis, every command through the "cache" circuit)
//!         fail → local.rs (bounded LRU, process lifetime)
//!
//! request path:
//!     caller → dyn CacheBackend (backend.rs)
//!         remote: circuit open → degraded default, never an error
//!         local:  in-process, cannot fail on the network
//! ```
//!
//! # Design Decisions
//! - One trait, two independent implementations; no shared base type
//! - Reply values follow Redis literally (0/1 booleans, -1/-2 TTL sentinels)
//! - Keys follow `{prefix}:{parts}` (keys.rs) so a shared Redis stays compatible

pub mod backend;
pub mod keys;
pub mod local;
pub mod pattern;
pub mod remote;
pub mod selector;
pub mod singleflight;

pub use backend::{
    CacheBackend, CacheBackendExt, CacheError, CacheKind, CacheResult, TTL_MISSING, TTL_NO_EXPIRY,
};
pub use local::LocalCache;
pub use remote::{RemoteCache, CACHE_CIRCUIT};
pub use selector::{BackendSelector, SelectedBackend};
pub use singleflight::Flight;
