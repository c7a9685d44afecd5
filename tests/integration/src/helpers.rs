//! Helpers for assembling an in-process fleet over in-memory collaborators.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pgsentinel_cluster::{Cluster, ClusterConfig, Endpoint};
use pgsentinel_server::bus::{MemoryBus, Subscription};
use pgsentinel_server::db::{ProbeError, WalProbe};
use pgsentinel_server::elector::Elector;
use pgsentinel_server::error::SentinelError;
use pgsentinel_server::kv::{KvStore, MemoryKv};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const PREFIX: &str = "key/prod/postgres";
pub const CHANNEL: &str = "pgsentinel-prod";

/// Scripted database: a queue of primary answers and one standby answer.
///
/// Each peer in a test fleet gets its own instance, so primary scripts are
/// per-peer while the standby answers identically to everyone.
pub struct FakeDb {
    primary: Mutex<VecDeque<Result<String, ProbeError>>>,
    standby: Mutex<Result<String, ProbeError>>,
    panic_on_primary: bool,
}

impl FakeDb {
    pub fn new() -> Self {
        Self {
            primary: Mutex::new(VecDeque::new()),
            standby: Mutex::new(Err(ProbeError::Connection("no standby scripted".into()))),
            panic_on_primary: false,
        }
    }

    /// Sets the answers the primary probe will replay, in order. Once the
    /// script runs out every further probe is refused.
    pub fn primary_script<I>(self, script: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ProbeError>>,
    {
        *self.primary.lock().unwrap() = script.into_iter().collect();
        self
    }

    pub fn standby_wal(self, value: &str) -> Self {
        *self.standby.lock().unwrap() = Ok(value.to_string());
        self
    }

    /// A database whose primary probe crashes the calling task, standing in
    /// for a child that dies rather than fails.
    pub fn panicking() -> Self {
        Self {
            panic_on_primary: true,
            ..Self::new()
        }
    }

    pub fn ok(value: &str) -> Result<String, ProbeError> {
        Ok(value.to_string())
    }

    pub fn refused() -> Result<String, ProbeError> {
        Err(ProbeError::Connection("connection refused".into()))
    }
}

#[async_trait]
impl WalProbe for FakeDb {
    async fn current_wal_location(
        &self,
        _endpoint: &Endpoint,
        _dbname: &str,
    ) -> Result<String, ProbeError> {
        if self.panic_on_primary {
            panic!("scripted probe crash");
        }
        self.primary
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::refused)
    }

    async fn last_received_wal_location(
        &self,
        _endpoint: &Endpoint,
        _dbname: &str,
    ) -> Result<String, ProbeError> {
        self.standby.lock().unwrap().clone()
    }
}

/// The standard three-peer test cluster: primary `pg-m`, standby `h2`.
pub fn cluster(trigger: &Path) -> Cluster {
    Cluster {
        name: "prod".into(),
        primary: Endpoint {
            fqdn: "pg-m".into(),
            ip: "10.0.0.1".into(),
            port: 5432,
        },
        standby: Endpoint {
            fqdn: "h2".into(),
            ip: "10.0.0.2".into(),
            port: 5432,
        },
        config: ClusterConfig {
            dbname: "app".into(),
            quorum: 2,
            retries: 2,
            // a real healthy interval keeps whole-fleet tests from racing
            // probes against peers that are still subscribing
            interval_good: 1,
            interval_fail: 0,
            location_lag: 500_000_000,
            trigger: trigger.to_path_buf(),
            bus_endpoint: "sentinel1".into(),
        },
    }
}

/// Writes a cluster definition into the KV store under [`PREFIX`].
pub async fn seed_kv(kv: &MemoryKv, cluster: &Cluster) {
    let config = serde_json::to_string(&cluster.config).unwrap();
    kv.put(&format!("{PREFIX}/{}/config", cluster.name), &config)
        .await
        .unwrap();
    for (role, endpoint) in [("master", &cluster.primary), ("slave", &cluster.standby)] {
        let base = format!("{PREFIX}/{}/{role}", cluster.name);
        kv.put(&format!("{base}/fqdn"), &endpoint.fqdn).await.unwrap();
        kv.put(&format!("{base}/ip"), &endpoint.ip).await.unwrap();
        kv.put(&format!("{base}/port"), &endpoint.port.to_string())
            .await
            .unwrap();
    }
}

/// Spawns one elector as `host`.
pub fn spawn_elector(
    cluster: &Cluster,
    host: &str,
    kv: &Arc<MemoryKv>,
    bus: &Arc<MemoryBus>,
    db: &Arc<FakeDb>,
) -> JoinHandle<Result<(), SentinelError>> {
    let elector = Elector::new(
        cluster.clone(),
        host.to_string(),
        PREFIX.to_string(),
        Arc::clone(kv),
        Arc::clone(bus),
        Arc::clone(db),
    );
    tokio::spawn(elector.run())
}

/// Gives freshly spawned tasks a beat to subscribe before traffic starts.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Collects lines until the channel stays quiet for `window`.
pub async fn drain(sub: &mut Subscription, window: Duration) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(Some(line)) = timeout(window, sub.next_line()).await {
        lines.push(line);
    }
    lines
}

/// Counts the lines with the given tag, per voter (the last token).
pub fn per_voter_counts<'a>(
    lines: &'a [String],
    tag: &str,
) -> std::collections::HashMap<&'a str, usize> {
    let mut counts = std::collections::HashMap::new();
    for line in lines {
        if line.starts_with(tag) {
            if let Some(voter) = line.split_whitespace().last() {
                *counts.entry(voter).or_insert(0) += 1;
            }
        }
    }
    counts
}
