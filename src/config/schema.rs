//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the cache
//! layer. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Network cache store connection settings.
    pub redis: RedisConfig,

    /// Circuit breaker defaults and per-circuit overrides.
    pub circuit_breaker: CircuitBreakerSettings,

    /// In-process fallback cache settings.
    pub local_cache: LocalCacheConfig,

    /// Role/permission cache settings.
    pub rbac: RbacConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Try the network store at all. When false the local cache is used.
    pub enabled: bool,

    /// Connection URL (`redis://` or `rediss://`).
    pub url: String,

    /// Startup probe deadline in milliseconds.
    pub connect_timeout_ms: u64,

    /// Deadline for each cache command in milliseconds.
    pub command_timeout_ms: u64,

    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 2000,
            command_timeout_ms: 1000,
            pool_size: 16,
        }
    }
}

/// Process-wide circuit breaker defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failure ratio (0..=1) that opens a circuit.
    pub failure_threshold: f64,

    /// Consecutive half-open successes that close a circuit.
    pub success_threshold: u32,

    /// Open duration before a trial call, in milliseconds.
    pub timeout_ms: u64,

    /// Requests observed before the failure ratio is evaluated.
    pub minimum_requests: u32,

    /// Override applied to the `cache` circuit used by the remote store.
    pub cache: CircuitOverrideSettings,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            success_threshold: 2,
            timeout_ms: 60_000,
            minimum_requests: 10,
            cache: CircuitOverrideSettings::default(),
        }
    }
}

/// Field-by-field override; unset fields fall back to the defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CircuitOverrideSettings {
    pub failure_threshold: Option<f64>,
    pub success_threshold: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub minimum_requests: Option<u32>,
}

/// In-process cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Maximum scalar entries before least-recently-used eviction.
    pub max_entries: usize,

    /// Expired-entry sweep interval in seconds (0 disables the sweeper).
    pub sweep_interval_secs: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

/// Role/permission cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RbacConfig {
    /// TTL for user role/permission entries, in seconds.
    pub default_ttl_secs: u64,

    /// Users cleared concurrently per invalidation batch.
    pub invalidation_batch_size: usize,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            invalidation_batch_size: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format (`pretty` or `json`).
    pub log_format: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
