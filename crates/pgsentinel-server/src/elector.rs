//! The elector: drives the quorum protocol for one cluster.
//!
//! Consumes the cluster channel strictly in received order, feeds each
//! message to the pure [`Election`] machine, and performs the I/O the
//! machine asks for: publishing votes, running the standby viability
//! check, and executing the promotion side effects.

use std::sync::Arc;

use pgsentinel_cluster::{cluster_from_channel, Action, Cluster, Election};
use pgsentinel_proto::{StatusMessage, WalPosition};
use tracing::{debug, error, info, warn};

use crate::bus::Bus;
use crate::config;
use crate::db::{with_deadline, WalProbe};
use crate::error::SentinelError;
use crate::kv::KvStore;

/// One peer's elector for one cluster.
pub struct Elector<K, B, P> {
    cluster: Cluster,
    local_host: String,
    kv_prefix: String,
    kv: Arc<K>,
    bus: Arc<B>,
    probe: Arc<P>,
    election: Election,
}

impl<K: KvStore, B: Bus, P: WalProbe> Elector<K, B, P> {
    pub fn new(
        cluster: Cluster,
        local_host: String,
        kv_prefix: String,
        kv: Arc<K>,
        bus: Arc<B>,
        probe: Arc<P>,
    ) -> Self {
        let election = Election::new(local_host.clone(), cluster.config.quorum);
        Self {
            cluster,
            local_host,
            kv_prefix,
            kv,
            bus,
            probe,
            election,
        }
    }

    /// Consumes the channel until promotion completes somewhere or a fatal
    /// error ends the daemon.
    pub async fn run(mut self) -> Result<(), SentinelError> {
        let channel = self.cluster.channel();
        debug_assert_eq!(
            cluster_from_channel(&channel),
            Some(self.cluster.name.as_str())
        );

        let mut sub = self.bus.subscribe(&channel).await?;
        info!(
            cluster = %self.cluster.name,
            channel = %channel,
            quorum = self.cluster.config.quorum,
            "elector watching"
        );

        while let Some(line) = sub.next_line().await {
            let msg = match StatusMessage::parse(&line) {
                Ok(msg) => msg,
                Err(err) => {
                    // the bus may carry message kinds from newer peers
                    warn!(cluster = %self.cluster.name, error = %err, line = %line, "skipping unparseable bus line");
                    continue;
                }
            };
            debug!(cluster = %self.cluster.name, line = %line, "bus message");

            match self.election.apply(&msg) {
                None => {}

                Some(Action::PublishODown) => {
                    warn!(
                        cluster = %self.cluster.name,
                        votes = self.election.sdown_votes().count(),
                        "quorum agrees, declaring primary objectively down"
                    );
                    let odown = StatusMessage::ODown {
                        primary: self.cluster.primary.fqdn.clone(),
                        voter: self.local_host.clone(),
                    };
                    self.bus.publish(&channel, &odown.encode()).await?;
                }

                Some(Action::CheckCandidate) => {
                    self.check_candidate(&channel).await?;
                }

                Some(Action::BeginPromotion) => {
                    self.promote(&channel).await;
                    self.election.promotion_finished();
                    info!(cluster = %self.cluster.name, "promotion complete, shutting down");
                    return Ok(());
                }

                Some(Action::Shutdown) => {
                    info!(cluster = %self.cluster.name, "new master announced, shutting down");
                    return Ok(());
                }
            }
        }

        Err(SentinelError::Bus(crate::bus::BusError::Closed))
    }

    /// The standby viability check.
    ///
    /// Endorses the standby with `+SELECT` when its replication lag is
    /// within bounds. An over-lag standby stalls the election, loudly, so
    /// an operator can intervene; only a malformed answer is fatal.
    async fn check_candidate(&mut self, channel: &str) -> Result<(), SentinelError> {
        // re-read the standby keys: an operator may have repointed them
        // since startup
        let standby =
            config::load_standby_endpoint(self.kv.as_ref(), &self.kv_prefix, &self.cluster.name)
                .await?;

        let raw = with_deadline(
            self.probe
                .last_received_wal_location(&standby, &self.cluster.config.dbname),
        )
        .await?;

        let standby_wal = match WalPosition::parse(&raw) {
            Ok(position) => position,
            Err(_) => {
                error!(
                    cluster = %self.cluster.name,
                    standby = %standby.fqdn,
                    raw = %raw,
                    "standby answered the viability probe with garbage"
                );
                return Err(SentinelError::MalformedStandbyWal(raw));
            }
        };

        let Some(baseline) = self.election.last_known_xlog() else {
            warn!(
                cluster = %self.cluster.name,
                "no wal baseline observed yet, cannot judge standby lag; stalling"
            );
            self.election.candidate_refused();
            return Ok(());
        };

        // computed once; the same value feeds the gate and the log line
        let lag = baseline.delta_bytes(standby_wal);
        if lag > self.cluster.config.location_lag {
            error!(
                cluster = %self.cluster.name,
                standby = %standby.fqdn,
                lag,
                threshold = self.cluster.config.location_lag,
                "standby lag exceeds the safety threshold, refusing to endorse; promotion stalls until an operator intervenes"
            );
            self.election.candidate_refused();
            return Ok(());
        }

        info!(
            cluster = %self.cluster.name,
            standby = %standby.fqdn,
            lag,
            "standby viable, endorsing as successor"
        );
        let select = StatusMessage::Select {
            candidate: standby.fqdn.clone(),
            voter: self.local_host.clone(),
        };
        self.bus.publish(channel, &select.encode()).await?;
        self.election.candidate_endorsed(&standby.fqdn);
        Ok(())
    }

    /// The promotion side effects.
    ///
    /// All three steps are attempted even when earlier ones fail; once
    /// promotion starts the cluster state is committed and there is no
    /// rollback.
    async fn promote(&self, channel: &str) {
        let trigger = &self.cluster.config.trigger;
        warn!(
            cluster = %self.cluster.name,
            trigger = %trigger.display(),
            "quorum endorsed this host, promoting local standby to primary"
        );

        match tokio::fs::write(trigger, b"").await {
            Ok(()) => info!(cluster = %self.cluster.name, trigger = %trigger.display(), "trigger file created"),
            Err(err) => error!(
                cluster = %self.cluster.name,
                trigger = %trigger.display(),
                error = %err,
                "failed to create the trigger file; promotion considered failed"
            ),
        }

        if let Err(err) = config::rewrite_primary(
            self.kv.as_ref(),
            &self.kv_prefix,
            &self.cluster.name,
            &self.cluster.standby,
        )
        .await
        {
            error!(
                cluster = %self.cluster.name,
                error = %err,
                "failed to rewrite the primary endpoint in the kv store"
            );
        }

        if let Err(err) = self
            .bus
            .publish(channel, &StatusMessage::NewMaster.encode())
            .await
        {
            error!(
                cluster = %self.cluster.name,
                error = %err,
                "failed to announce the new master"
            );
        }
    }
}
