//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every network-backed cache command
//! - Surface an elapsed deadline as its own error so the breaker counts it
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline wraps the whole command including pool checkout

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The wrapped future did not complete before its deadline.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Run `fut` with a deadline; `Err(Elapsed)` if it does not finish in time.
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}
