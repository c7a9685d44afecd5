//! pgsentinel: distributed failover coordinator for primary/standby pairs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pgsentinel_server::{bus::TcpBus, config, kv::DirKv, postgres::PostgresProbe, supervisor};

/// Distributed failover coordinator for PostgreSQL primary/standby pairs.
#[derive(Parser)]
#[command(name = "pgsentinel", version, about)]
struct Args {
    /// Root directory of the filesystem-backed KV tree.
    #[arg(long, value_name = "DIR")]
    kv_root: PathBuf,

    /// Key prefix the cluster definitions live under.
    #[arg(long, default_value = config::DEFAULT_KV_PREFIX)]
    kv_prefix: String,

    /// host:port of the pub/sub bus master.
    #[arg(long, value_name = "ADDR")]
    bus: String,

    /// Hostname this peer votes as; must match the fqdn the fleet knows it
    /// by. Defaults to $HOSTNAME.
    #[arg(long)]
    hostname: Option<String>,

    /// Database user for WAL probes.
    #[arg(long, default_value = "postgres")]
    db_user: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "pgsentinel=info".into()),
        )
        .init();

    let args = Args::parse();

    let local_host = match args.hostname.or_else(|| std::env::var("HOSTNAME").ok()) {
        Some(host) if !host.is_empty() => host,
        _ => {
            eprintln!("pgsentinel: no --hostname given and $HOSTNAME is unset");
            return ExitCode::from(1);
        }
    };

    let kv = Arc::new(DirKv::new(args.kv_root));
    let bus = Arc::new(TcpBus::new(args.bus));
    let probe = Arc::new(PostgresProbe::new(args.db_user));

    info!(host = %local_host, prefix = %args.kv_prefix, "pgsentinel starting");
    let code = supervisor::run(kv, bus, probe, &args.kv_prefix, &local_host).await;
    ExitCode::from(code)
}
