//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratios, thresholds, sizes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::{CircuitOverrideSettings, ServiceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let redis = &config.redis;
    if redis.enabled {
        if !(redis.url.starts_with("redis://") || redis.url.starts_with("rediss://")) {
            errors.push(ValidationError::new(
                "redis.url",
                "must start with redis:// or rediss://",
            ));
        }
        if redis.connect_timeout_ms == 0 {
            errors.push(ValidationError::new("redis.connect_timeout_ms", "must be > 0"));
        }
        if redis.command_timeout_ms == 0 {
            errors.push(ValidationError::new("redis.command_timeout_ms", "must be > 0"));
        }
        if redis.pool_size == 0 {
            errors.push(ValidationError::new("redis.pool_size", "must be >= 1"));
        }
    }

    let cb = &config.circuit_breaker;
    check_ratio(&mut errors, "circuit_breaker.failure_threshold", cb.failure_threshold);
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be >= 1"));
    }
    if cb.minimum_requests == 0 {
        errors.push(ValidationError::new("circuit_breaker.minimum_requests", "must be >= 1"));
    }
    if cb.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be > 0"));
    }
    check_override(&mut errors, "circuit_breaker.cache", &cb.cache);

    if config.local_cache.max_entries == 0 {
        errors.push(ValidationError::new("local_cache.max_entries", "must be >= 1"));
    }

    if config.rbac.default_ttl_secs == 0 {
        errors.push(ValidationError::new("rbac.default_ttl_secs", "must be >= 1"));
    }
    if config.rbac.invalidation_batch_size == 0 {
        errors.push(ValidationError::new("rbac.invalidation_batch_size", "must be >= 1"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected pretty or json", other),
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_ratio(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(ValidationError::new(field, "must be within (0, 1]"));
    }
}

fn check_override(errors: &mut Vec<ValidationError>, prefix: &str, o: &CircuitOverrideSettings) {
    if let Some(ratio) = o.failure_threshold {
        check_ratio(errors, &format!("{prefix}.failure_threshold"), ratio);
    }
    if o.success_threshold == Some(0) {
        errors.push(ValidationError::new(format!("{prefix}.success_threshold"), "must be >= 1"));
    }
    if o.minimum_requests == Some(0) {
        errors.push(ValidationError::new(format!("{prefix}.minimum_requests"), "must be >= 1"));
    }
    if o.timeout_ms == Some(0) {
        errors.push(ValidationError::new(format!("{prefix}.timeout_ms"), "must be > 0"));
    }
}
