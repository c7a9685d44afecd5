//! Startup orchestration and task supervision.
//!
//! The supervisor enumerates configured clusters, loads and validates each
//! definition, and spawns one (health probe, elector) pair per cluster into
//! a `JoinSet`. The daemon's lifetime is tied to its children: whichever
//! task finishes first, for whatever reason, brings everything else down
//! with it.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::bus::Bus;
use crate::config;
use crate::db::WalProbe;
use crate::elector::Elector;
use crate::error::SentinelError;
use crate::kv::KvStore;
use crate::probe::HealthProbe;

/// Exit code for a child task that ended prematurely for a reason the
/// error taxonomy does not cover (unexpected return, abort, panic).
const EXIT_CHILD_DIED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Probe,
    Elector,
}

impl TaskKind {
    fn name(self) -> &'static str {
        match self {
            TaskKind::Probe => "health probe",
            TaskKind::Elector => "elector",
        }
    }
}

/// Runs the daemon to completion and returns its process exit code.
pub async fn run<K, B, P>(
    kv: Arc<K>,
    bus: Arc<B>,
    probe: Arc<P>,
    kv_prefix: &str,
    local_host: &str,
) -> u8
where
    K: KvStore,
    B: Bus,
    P: WalProbe,
{
    let clusters = match config::discover_clusters(kv.as_ref(), kv_prefix).await {
        Ok(clusters) if !clusters.is_empty() => clusters,
        Ok(_) => {
            error!(prefix = %kv_prefix, "no clusters configured");
            eprintln!("pgsentinel: no clusters configured under {kv_prefix:?}");
            return 1;
        }
        Err(err) => {
            error!(prefix = %kv_prefix, error = %err, "failed to enumerate clusters");
            eprintln!("pgsentinel: {err}");
            return err.exit_code();
        }
    };
    info!(count = clusters.len(), names = ?clusters, "supervising clusters");

    let mut tasks: JoinSet<(TaskKind, String, Result<(), SentinelError>)> = JoinSet::new();

    for name in clusters {
        let cluster = match config::load_cluster(kv.as_ref(), kv_prefix, &name).await {
            Ok(cluster) => cluster,
            Err(err) => {
                error!(cluster = %name, error = %err, "failed to load cluster definition");
                eprintln!("pgsentinel: cluster {name}: {err}");
                tasks.shutdown().await;
                return err.exit_code();
            }
        };
        info!(
            cluster = %name,
            primary = %cluster.primary,
            standby = %cluster.standby,
            "starting monitor pair"
        );

        let health = HealthProbe::new(
            cluster.clone(),
            local_host.to_string(),
            Arc::clone(&probe),
            Arc::clone(&bus),
        );
        let task_name = name.clone();
        tasks.spawn(async move { (TaskKind::Probe, task_name, health.run().await) });

        let elector = Elector::new(
            cluster,
            local_host.to_string(),
            kv_prefix.to_string(),
            Arc::clone(&kv),
            Arc::clone(&bus),
            Arc::clone(&probe),
        );
        let task_name = name.clone();
        tasks.spawn(async move { (TaskKind::Elector, task_name, elector.run().await) });
    }

    // the first task to finish, for any reason, decides the exit code
    let code = match tasks.join_next().await {
        Some(Ok((TaskKind::Elector, cluster, Ok(())))) => {
            info!(cluster = %cluster, "elector finished after promotion; shutting down");
            0
        }
        Some(Ok((kind, cluster, Ok(())))) => {
            error!(cluster = %cluster, task = kind.name(), "task exited unexpectedly");
            EXIT_CHILD_DIED
        }
        Some(Ok((kind, cluster, Err(err)))) => {
            error!(cluster = %cluster, task = kind.name(), error = %err, "task failed");
            eprintln!("pgsentinel: {} for cluster {cluster}: {err}", kind.name());
            err.exit_code()
        }
        Some(Err(join_err)) => {
            error!(error = %join_err, "task aborted or panicked");
            EXIT_CHILD_DIED
        }
        None => {
            error!("no monitor tasks were started");
            1
        }
    };

    tasks.shutdown().await;
    code
}
