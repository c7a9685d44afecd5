//! Loading cluster definitions from the KV store.
//!
//! Key schema, rooted under a configurable prefix:
//!
//! ```text
//! <prefix>/<cluster>/config              JSON ClusterConfig document
//! <prefix>/<cluster>/master/{fqdn,ip,port}
//! <prefix>/<cluster>/slave/{fqdn,ip,port}
//! ```
//!
//! A recursive list of `<prefix>` yields every configured cluster via the
//! first path segment below the prefix.

use std::collections::BTreeSet;

use pgsentinel_cluster::{Cluster, ClusterConfig, Endpoint};

use crate::error::SentinelError;
use crate::kv::KvStore;

/// Default root of the cluster definitions.
pub const DEFAULT_KV_PREFIX: &str = "key/prod/postgres";

/// Enumerates the cluster names configured under `prefix`, sorted and
/// deduplicated.
pub async fn discover_clusters<K: KvStore + ?Sized>(
    kv: &K,
    prefix: &str,
) -> Result<Vec<String>, SentinelError> {
    let keys = kv.list(prefix).await?;
    let names: BTreeSet<&str> = keys
        .iter()
        .filter_map(|key| cluster_segment(prefix, key))
        .collect();
    Ok(names.into_iter().map(str::to_string).collect())
}

/// The path segment directly below the prefix, if any.
fn cluster_segment<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)?
        .strip_prefix('/')?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// Loads and validates one cluster definition.
pub async fn load_cluster<K: KvStore + ?Sized>(
    kv: &K,
    prefix: &str,
    name: &str,
) -> Result<Cluster, SentinelError> {
    let config_key = format!("{prefix}/{name}/config");
    let raw = require(kv, &config_key).await?;
    let config: ClusterConfig = serde_json::from_str(&raw)
        .map_err(|err| SentinelError::Config(format!("invalid document at {config_key}: {err}")))?;

    let primary = load_endpoint(kv, &format!("{prefix}/{name}/master")).await?;
    let standby = load_standby_endpoint(kv, prefix, name).await?;

    let cluster = Cluster {
        name: name.to_string(),
        primary,
        standby,
        config,
    };
    cluster
        .validate()
        .map_err(|err| SentinelError::Config(format!("cluster {name}: {err}")))?;
    Ok(cluster)
}

/// Loads the current standby endpoint.
///
/// The elector re-reads this at viability-check time rather than trusting
/// its startup copy, in case an operator repointed the standby keys.
pub async fn load_standby_endpoint<K: KvStore + ?Sized>(
    kv: &K,
    prefix: &str,
    name: &str,
) -> Result<Endpoint, SentinelError> {
    load_endpoint(kv, &format!("{prefix}/{name}/slave")).await
}

/// Rewrites the primary endpoint to the freshly promoted standby.
pub async fn rewrite_primary<K: KvStore + ?Sized>(
    kv: &K,
    prefix: &str,
    name: &str,
    new_primary: &Endpoint,
) -> Result<(), SentinelError> {
    let base = format!("{prefix}/{name}/master");
    kv.put(&format!("{base}/fqdn"), &new_primary.fqdn).await?;
    kv.put(&format!("{base}/ip"), &new_primary.ip).await?;
    kv.put(&format!("{base}/port"), &new_primary.port.to_string())
        .await?;
    Ok(())
}

async fn load_endpoint<K: KvStore + ?Sized>(
    kv: &K,
    base: &str,
) -> Result<Endpoint, SentinelError> {
    let fqdn = require(kv, &format!("{base}/fqdn")).await?;
    let ip = require(kv, &format!("{base}/ip")).await?;
    let port_key = format!("{base}/port");
    let port = require(kv, &port_key)
        .await?
        .parse()
        .map_err(|err| SentinelError::Config(format!("bad port at {port_key}: {err}")))?;
    Ok(Endpoint { fqdn, ip, port })
}

async fn require<K: KvStore + ?Sized>(kv: &K, key: &str) -> Result<String, SentinelError> {
    kv.get(key)
        .await?
        .ok_or_else(|| SentinelError::Config(format!("missing key {key}")))
}
