//! The local health probe: one perpetual loop per cluster.
//!
//! Each iteration opens a fresh connection to the primary and reads its
//! current WAL position under the hard probe deadline. Consecutive
//! failures accumulate until the retry budget is spent, at which point the
//! probe publishes its `+SDOWN` vote carrying the last position it saw,
//! which peers use as the lag baseline. A single successful probe rescinds
//! the vote with `-SDOWN` and re-arms the counter.

use std::sync::Arc;

use pgsentinel_cluster::Cluster;
use pgsentinel_proto::{StatusMessage, WalPosition};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bus::Bus;
use crate::db::{with_deadline, WalProbe};
use crate::error::SentinelError;

/// Probe loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Healthy,
    Failing(u32),
    SDownDeclared,
}

/// Watches one cluster's primary and votes on its reachability.
pub struct HealthProbe<P, B> {
    cluster: Cluster,
    local_host: String,
    probe: Arc<P>,
    bus: Arc<B>,
}

impl<P: WalProbe, B: Bus> HealthProbe<P, B> {
    pub fn new(cluster: Cluster, local_host: String, probe: Arc<P>, bus: Arc<B>) -> Self {
        Self {
            cluster,
            local_host,
            probe,
            bus,
        }
    }

    /// Runs the probe loop forever.
    ///
    /// The only way out is fatal: the retry budget was spent before a single
    /// valid WAL position was ever observed, so an `+SDOWN` vote would carry
    /// no lag baseline for the peers.
    pub async fn run(self) -> Result<(), SentinelError> {
        let channel = self.cluster.channel();
        let cluster = self.cluster.name.as_str();
        let primary = &self.cluster.primary;
        let config = &self.cluster.config;

        info!(cluster, primary = %primary.fqdn, "health probe watching");

        // stagger startup so a fleet restarted together does not probe in
        // lockstep
        let good = config.good_interval();
        if !good.is_zero() {
            sleep(good.mul_f64(rand::random::<f64>())).await;
        }

        let mut state = ProbeState::Healthy;
        let mut last_known: Option<WalPosition> = None;

        loop {
            let attempt =
                with_deadline(self.probe.current_wal_location(primary, &config.dbname)).await;

            match attempt {
                Ok(raw) => match WalPosition::parse(&raw) {
                    Ok(position) => {
                        last_known = Some(match last_known {
                            Some(current) => current.max(position),
                            None => position,
                        });
                        if state != ProbeState::Healthy {
                            info!(cluster, wal = %position, "primary reachable again, rescinding vote");
                            let cleared = StatusMessage::SDownCleared {
                                primary: primary.fqdn.clone(),
                                voter: self.local_host.clone(),
                            };
                            self.bus.publish(&channel, &cleared.encode()).await?;
                        } else {
                            debug!(cluster, wal = %position, "primary healthy");
                        }
                        state = ProbeState::Healthy;
                        sleep(config.good_interval()).await;
                    }
                    Err(err) => {
                        // the server answered, just not with a position we
                        // can use; that is not evidence of unreachability and
                        // never counts toward the vote
                        warn!(cluster, error = %err, raw = %raw, "primary returned an unusable wal position");
                        sleep(config.fail_interval()).await;
                    }
                },

                Err(err) => {
                    match state {
                        ProbeState::SDownDeclared => {
                            // already voted; only a success re-arms
                            debug!(cluster, error = %err, "primary still unreachable");
                        }
                        ProbeState::Healthy | ProbeState::Failing(_) => {
                            let failures = match state {
                                ProbeState::Failing(n) => n + 1,
                                _ => 1,
                            };
                            debug!(cluster, failures, error = %err, "primary probe failed");

                            if failures >= config.retries {
                                let Some(wal) = last_known else {
                                    error!(
                                        cluster,
                                        "primary unreachable before any wal position was observed; a vote would have no lag baseline"
                                    );
                                    return Err(SentinelError::NoWalBaseline);
                                };
                                warn!(cluster, failures, wal = %wal, "declaring primary subjectively down");
                                let sdown = StatusMessage::SDown {
                                    primary: primary.fqdn.clone(),
                                    voter: self.local_host.clone(),
                                    wal,
                                };
                                self.bus.publish(&channel, &sdown.encode()).await?;
                                state = ProbeState::SDownDeclared;
                            } else {
                                state = ProbeState::Failing(failures);
                            }
                        }
                    }
                    sleep(config.fail_interval()).await;
                }
            }
        }
    }
}
