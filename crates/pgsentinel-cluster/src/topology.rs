//! Cluster topology: the monitored database pair and its tunables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Channel name prefix shared by every cluster.
const CHANNEL_PREFIX: &str = "pgsentinel";

/// Error returned when a cluster definition fails validation.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("quorum must be at least 1")]
    QuorumTooSmall,

    #[error("retries must be at least 1")]
    RetriesTooSmall,

    /// The channel grammar recovers the cluster name as the suffix after the
    /// last `-`, so a dash inside the name would not survive the round trip.
    #[error("cluster name {0:?} must not contain '-'")]
    InvalidName(String),

    #[error("primary and standby share the same ip {0:?}")]
    SharedAddress(String),
}

/// One half of the monitored pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub fqdn: String,
    pub ip: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Per-cluster tunables, stored as a JSON document in the KV store.
///
/// All fields are required; a document missing any of them is a
/// configuration error at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Logical database to probe.
    pub dbname: String,
    /// Distinct voter identities required to advance each voting phase.
    pub quorum: usize,
    /// Consecutive probe failures before the local peer declares SDOWN.
    pub retries: u32,
    /// Seconds between probes while the primary answers.
    pub interval_good: u64,
    /// Seconds between probes while the primary is failing.
    pub interval_fail: u64,
    /// Maximum tolerated byte lag of the standby before promotion is refused.
    pub location_lag: u64,
    /// Path whose creation tells the standby database process to promote.
    pub trigger: PathBuf,
    /// Identifier used to locate the pub/sub master for this cluster.
    #[serde(rename = "sentinel_name")]
    pub bus_endpoint: String,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quorum < 1 {
            return Err(ConfigError::QuorumTooSmall);
        }
        if self.retries < 1 {
            return Err(ConfigError::RetriesTooSmall);
        }
        Ok(())
    }

    pub fn good_interval(&self) -> Duration {
        Duration::from_secs(self.interval_good)
    }

    pub fn fail_interval(&self) -> Duration {
        Duration::from_secs(self.interval_fail)
    }
}

/// The unit of monitoring: a named primary/standby pair plus its tunables.
///
/// Built from the KV store at daemon startup; the primary endpoint is
/// rewritten to the standby endpoint by a successful promotion.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub primary: Endpoint,
    pub standby: Endpoint,
    pub config: ClusterConfig,
}

impl Cluster {
    /// The pub/sub channel all peers watching this cluster share.
    pub fn channel(&self) -> String {
        channel_for(&self.name)
    }

    /// Validates the pair and its tunables.
    ///
    /// A shared ip means the "pair" is one machine and failover could never
    /// help; the daemon refuses to start on it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.name.contains('-') {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.primary.ip == self.standby.ip {
            return Err(ConfigError::SharedAddress(self.primary.ip.clone()));
        }
        Ok(())
    }
}

/// Channel name for a cluster.
pub fn channel_for(cluster: &str) -> String {
    format!("{CHANNEL_PREFIX}-{cluster}")
}

/// Recovers the cluster name from a channel name: the suffix after the
/// last `-`. Returns `None` for names with no dash at all.
pub fn cluster_from_channel(channel: &str) -> Option<&str> {
    channel.rsplit_once('-').map(|(_, name)| name)
}
