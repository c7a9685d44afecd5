//! pgsentinel-server: the failover coordinator daemon.
//!
//! One daemon instance runs per peer in the fleet. For every monitored
//! cluster the [`supervisor`] starts two independent tasks: a
//! [`probe::HealthProbe`] that watches the primary and publishes
//! `+SDOWN`/`-SDOWN` transitions, and an [`elector::Elector`] that consumes
//! the cluster channel and drives the quorum protocol through to promotion.
//! The two tasks share no state; everything flows over the bus.
//!
//! The adapters in [`kv`], [`bus`], and [`db`] are trait seams so tests can
//! run whole fleets in-process against in-memory fakes.

pub mod bus;
pub mod config;
pub mod db;
pub mod elector;
pub mod error;
pub mod kv;
pub mod postgres;
pub mod probe;
pub mod supervisor;
