//! Circuit breaker for unreliable external calls.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls test whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= minimum_requests && failures / requests >= failure_threshold
//! Open → Half-Open: first call after `timeout` has elapsed since the last failure
//! Half-Open → Closed: success_threshold consecutive successes (all counters reset)
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One record per circuit name, created lazily, never removed
//! - Each record sits behind its own mutex; the lock is never held across the
//!   wrapped operation's `.await`
//! - The operation's own error is returned unchanged; `CircuitError::Open` is
//!   only produced when the breaker refuses to invoke the operation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::schema::{CircuitBreakerSettings, CircuitOverrideSettings};
use crate::observability::metrics;

/// Breaker state for a single named circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Thresholds governing a circuit.
///
/// Defaults: `failure_threshold = 0.5`, `success_threshold = 2`,
/// `timeout = 60s`, `minimum_requests = 10`.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Failure ratio (0..=1) that opens the circuit.
    pub failure_threshold: f64,
    /// Consecutive half-open successes needed to close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub timeout: Duration,
    /// Requests observed before the failure ratio is considered.
    pub minimum_requests: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            minimum_requests: 10,
        }
    }
}

impl CircuitConfig {
    /// Merge a call-site override over these values, field by field.
    pub fn merge(&self, overrides: &CircuitConfigOverride) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: overrides.failure_threshold.unwrap_or(self.failure_threshold),
            success_threshold: overrides.success_threshold.unwrap_or(self.success_threshold),
            timeout: overrides.timeout.unwrap_or(self.timeout),
            minimum_requests: overrides.minimum_requests.unwrap_or(self.minimum_requests),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            timeout: Duration::from_millis(settings.timeout_ms),
            minimum_requests: settings.minimum_requests,
        }
    }
}

/// Partial configuration supplied at a call site. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitConfigOverride {
    pub failure_threshold: Option<f64>,
    pub success_threshold: Option<u32>,
    pub timeout: Option<Duration>,
    pub minimum_requests: Option<u32>,
}

impl From<&CircuitOverrideSettings> for CircuitConfigOverride {
    fn from(settings: &CircuitOverrideSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            timeout: settings.timeout_ms.map(Duration::from_millis),
            minimum_requests: settings.minimum_requests,
        }
    }
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker refused to invoke the operation.
    #[error("circuit '{circuit}' is open")]
    Open { circuit: String },

    /// The operation ran and failed with its own error.
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

#[derive(Debug, Default)]
struct CircuitRecord {
    state: CircuitState,
    request_count: u64,
    failure_count: u64,
    success_count: u64,
    consecutive_successes: u64,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a circuit's record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub request_count: u64,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_successes: u64,
    /// Milliseconds since the last recorded failure, if any.
    pub last_failure_ms_ago: Option<u64>,
}

impl CircuitStats {
    fn from_record(name: &str, record: &CircuitRecord) -> Self {
        Self {
            name: name.to_string(),
            state: record.state,
            request_count: record.request_count,
            failure_count: record.failure_count,
            success_count: record.success_count,
            consecutive_successes: record.consecutive_successes,
            last_failure_ms_ago: record
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Observed failure ratio, 0.0 when no requests were recorded.
    pub fn failure_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.request_count as f64
        }
    }
}

/// Named, independent circuit breakers sharing one set of default thresholds.
pub struct CircuitBreaker {
    defaults: CircuitConfig,
    circuits: DashMap<String, Arc<Mutex<CircuitRecord>>>,
}

impl CircuitBreaker {
    pub fn new(defaults: CircuitConfig) -> Self {
        Self {
            defaults,
            circuits: DashMap::new(),
        }
    }

    /// Process-wide defaults used when no override is supplied.
    pub fn defaults(&self) -> &CircuitConfig {
        &self.defaults
    }

    /// Run `operation` under the named circuit with default thresholds.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = self.defaults.clone();
        self.run(name, &config, operation).await
    }

    /// Run `operation` with `overrides` merged over the defaults for this call.
    pub async fn execute_with_config<T, E, F, Fut>(
        &self,
        name: &str,
        overrides: &CircuitConfigOverride,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = self.defaults.merge(overrides);
        self.run(name, &config, operation).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        name: &str,
        config: &CircuitConfig,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let record = self.record(name);
        Self::admit(name, &record, config)?;

        match operation().await {
            Ok(value) => {
                Self::on_success(name, &mut record.lock(), config);
                Ok(value)
            }
            Err(e) => {
                Self::on_failure(name, &mut record.lock(), config);
                Err(CircuitError::Operation(e))
            }
        }
    }

    /// Current state; unseen names report `Closed`.
    pub fn get_state(&self, name: &str) -> CircuitState {
        self.circuits
            .get(name)
            .map(|r| r.lock().state)
            .unwrap_or_default()
    }

    /// Snapshot of a circuit's counters; unseen names report zeroes.
    pub fn get_stats(&self, name: &str) -> CircuitStats {
        match self.circuits.get(name) {
            Some(r) => CircuitStats::from_record(name, &r.lock()),
            None => CircuitStats::from_record(name, &CircuitRecord::default()),
        }
    }

    /// Snapshot of every circuit seen so far, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|r| CircuitStats::from_record(r.key(), &r.value().lock()))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Force the circuit closed and zero its counters.
    pub fn reset(&self, name: &str) {
        let record = self.record(name);
        let mut guard = record.lock();
        let previous = guard.state;
        *guard = CircuitRecord::default();
        metrics::record_circuit_state(name, CircuitState::Closed);
        tracing::info!(circuit = %name, previous = previous.as_str(), "Circuit reset");
    }

    fn record(&self, name: &str) -> Arc<Mutex<CircuitRecord>> {
        if let Some(existing) = self.circuits.get(name) {
            return existing.clone();
        }
        self.circuits.entry(name.to_string()).or_default().clone()
    }

    fn admit<E>(
        name: &str,
        record: &Mutex<CircuitRecord>,
        config: &CircuitConfig,
    ) -> Result<(), CircuitError<E>> {
        let mut guard = record.lock();
        if guard.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = guard
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(config.timeout);
        if elapsed < config.timeout {
            metrics::record_circuit_rejection(name);
            return Err(CircuitError::Open {
                circuit: name.to_string(),
            });
        }

        Self::transition(name, &mut guard, CircuitState::HalfOpen);
        Ok(())
    }

    fn on_success(name: &str, record: &mut CircuitRecord, config: &CircuitConfig) {
        record.request_count += 1;
        record.success_count += 1;
        record.consecutive_successes += 1;

        match record.state {
            CircuitState::Closed => Self::trip_if_needed(name, record, config),
            CircuitState::HalfOpen => {
                if record.consecutive_successes >= u64::from(config.success_threshold) {
                    Self::transition(name, record, CircuitState::Closed);
                    *record = CircuitRecord::default();
                }
            }
            // Another caller reopened the circuit while this call was in flight.
            CircuitState::Open => {}
        }
    }

    fn on_failure(name: &str, record: &mut CircuitRecord, config: &CircuitConfig) {
        record.request_count += 1;
        record.failure_count += 1;
        record.consecutive_successes = 0;

        match record.state {
            CircuitState::Closed => Self::trip_if_needed(name, record, config),
            CircuitState::HalfOpen | CircuitState::Open => {
                record.last_failure = Some(Instant::now());
                Self::transition(name, record, CircuitState::Open);
            }
        }
    }

    fn trip_if_needed(name: &str, record: &mut CircuitRecord, config: &CircuitConfig) {
        if record.request_count < u64::from(config.minimum_requests) {
            return;
        }
        let ratio = record.failure_count as f64 / record.request_count as f64;
        if ratio >= config.failure_threshold {
            record.last_failure = Some(Instant::now());
            Self::transition(name, record, CircuitState::Open);
        }
    }

    fn transition(name: &str, record: &mut CircuitRecord, to: CircuitState) {
        if record.state == to {
            return;
        }
        let from = record.state;
        record.state = to;
        metrics::record_circuit_transition(name, to);

        match to {
            CircuitState::Open => tracing::warn!(
                circuit = %name,
                from = from.as_str(),
                requests = record.request_count,
                failures = record.failure_count,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %name, "Circuit half-open, admitting trial calls")
            }
            CircuitState::Closed => tracing::info!(circuit = %name, "Circuit closed"),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fail(cb: &CircuitBreaker, name: &str) -> Result<(), CircuitError<&'static str>> {
        cb.execute(name, || async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker, name: &str) -> Result<u32, CircuitError<&'static str>> {
        cb.execute(name, || async { Ok(7) }).await
    }

    async fn trip(cb: &CircuitBreaker, name: &str) {
        for _ in 0..10 {
            let _ = fail(cb, name).await;
        }
        assert_eq!(cb.get_state(name), CircuitState::Open);
    }

    #[test]
    fn test_fresh_circuit_is_closed_and_zeroed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.get_state("unseen"), CircuitState::Closed);

        let stats = cb.get_stats("unseen");
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.consecutive_successes, 0);
        assert!(stats.last_failure_ms_ago.is_none());
        assert!(cb.all_stats().is_empty());
    }

    #[tokio::test]
    async fn test_opens_after_minimum_failures_and_short_circuits() {
        let cb = CircuitBreaker::default();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        for _ in 0..10 {
            let res = cb
                .execute("x", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down")
                })
                .await;
            assert!(matches!(res, Err(CircuitError::Operation("down"))));
        }
        assert_eq!(cb.get_state("x"), CircuitState::Open);

        let res = cb
            .execute("x", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down")
            })
            .await;
        assert!(matches!(res, Err(CircuitError::Open { ref circuit }) if circuit == "x"));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_stays_closed_below_minimum_requests() {
        let cb = CircuitBreaker::default();
        for _ in 0..9 {
            let _ = fail(&cb, "x").await;
        }
        assert_eq!(cb.get_state("x"), CircuitState::Closed);
        assert_eq!(cb.get_stats("x").failure_count, 9);
    }

    #[tokio::test]
    async fn test_stays_closed_below_failure_ratio() {
        let cb = CircuitBreaker::default();
        for _ in 0..6 {
            succeed(&cb, "x").await.unwrap();
        }
        for _ in 0..4 {
            let _ = fail(&cb, "x").await;
        }
        let stats = cb.get_stats("x");
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.request_count, 10);
        assert!((stats.failure_rate() - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes() {
        let cb = CircuitBreaker::default();
        trip(&cb, "x").await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(succeed(&cb, "x").await.unwrap_err().is_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(succeed(&cb, "x").await.unwrap(), 7);
        assert_eq!(cb.get_state("x"), CircuitState::HalfOpen);

        succeed(&cb, "x").await.unwrap();
        let stats = cb.get_stats("x");
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::default();
        trip(&cb, "x").await;

        tokio::time::advance(Duration::from_secs(60)).await;
        let res = fail(&cb, "x").await;
        assert!(matches!(res, Err(CircuitError::Operation("boom"))));
        assert_eq!(cb.get_state("x"), CircuitState::Open);

        // The failure restarted the open window.
        assert!(succeed(&cb, "x").await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_circuits_are_independent() {
        let cb = CircuitBreaker::default();
        trip(&cb, "a").await;

        assert_eq!(cb.get_state("b"), CircuitState::Closed);
        assert_eq!(succeed(&cb, "b").await.unwrap(), 7);
        assert_eq!(cb.get_stats("b").request_count, 1);
        assert_eq!(cb.get_stats("a").request_count, 10);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let cb = CircuitBreaker::default();
        trip(&cb, "x").await;

        cb.reset("x");
        let stats = cb.get_stats("x");
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.request_count, 0);
        assert_eq!(succeed(&cb, "x").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_override_merges_without_touching_defaults() {
        let cb = CircuitBreaker::default();
        let overrides = CircuitConfigOverride {
            minimum_requests: Some(2),
            ..Default::default()
        };

        for _ in 0..2 {
            let _ = cb
                .execute_with_config("x", &overrides, || async { Err::<(), _>("boom") })
                .await;
        }
        assert_eq!(cb.get_state("x"), CircuitState::Open);
        assert_eq!(cb.defaults().minimum_requests, 10);

        let merged = cb.defaults().merge(&overrides);
        assert_eq!(merged.minimum_requests, 2);
        assert_eq!(merged.success_threshold, 2);
        assert_eq!(merged.timeout, Duration::from_secs(60));
    }
}
