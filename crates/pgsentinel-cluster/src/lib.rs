//! pgsentinel-cluster: coordination logic for primary/standby failover.
//!
//! This crate holds the pure, I/O-free half of the daemon:
//!
//! - **Topology**: the monitored cluster, its two endpoints, and the
//!   per-cluster tunables loaded from the KV store.
//! - **Election**: the four-phase agreement state machine that turns a
//!   stream of peer status messages into at most one safe promotion.
//!
//! The state machine never performs I/O itself. Callers feed it one message
//! at a time, execute the [`Action`]s it hands back (publish a vote, run
//! the standby viability check, begin promotion), and report the outcome
//! through the `candidate_*` callbacks. Keeping the machine synchronous makes
//! every protocol property testable from a plain message trace.

mod election;
mod topology;

pub use election::{Action, Election, Phase, VoteSet};
pub use topology::{
    channel_for, cluster_from_channel, Cluster, ClusterConfig, ConfigError, Endpoint,
};
