//! The database probe seam.
//!
//! Both probe flavours open a fresh connection, run a single query, and
//! return the textual WAL position the server printed. Every call site
//! wraps the probe in [`with_deadline`]; a hung server counts as a failure
//! after five seconds, never a hung daemon.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use pgsentinel_cluster::Endpoint;
use thiserror::Error;

/// Hard ceiling for one probe attempt: connect, query, and read combined.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Errors from a single probe attempt. All of them are transient from the
/// health loop's point of view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe deadline expired")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Reads WAL positions from a database endpoint.
#[async_trait]
pub trait WalProbe: Send + Sync + 'static {
    /// The current write position of a primary.
    async fn current_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, ProbeError>;

    /// The last position a standby has received from its primary.
    async fn last_received_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, ProbeError>;
}

/// Bounds a probe attempt by [`PROBE_DEADLINE`]; expiry reports as failure.
pub async fn with_deadline<T>(
    attempt: impl Future<Output = Result<T, ProbeError>>,
) -> Result<T, ProbeError> {
    match tokio::time::timeout(PROBE_DEADLINE, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout),
    }
}
