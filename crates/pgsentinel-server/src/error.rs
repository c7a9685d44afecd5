//! The daemon's error taxonomy and its mapping to process exit codes.

use thiserror::Error;

use crate::bus::BusError;
use crate::db::ProbeError;
use crate::kv::KvError;

/// Fatal errors a monitor task can die with.
///
/// Transient probe failures never become a `SentinelError`; they are
/// absorbed by the health-probe retry loop. Everything here ends the
/// process.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("kv store error: {0}")]
    Kv(#[from] KvError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The standby viability probe could not be completed at all.
    #[error("standby viability probe failed: {0}")]
    CandidateProbe(#[from] ProbeError),

    /// The local probe exhausted its retries without ever reading a valid
    /// WAL position, so an `+SDOWN` vote would carry no lag baseline for
    /// the peers. Dying is safer than voting blind.
    #[error("primary declared down before any wal position was observed")]
    NoWalBaseline,

    /// The standby answered the viability probe with something that is not
    /// a WAL position.
    #[error("standby returned a malformed wal position: {0:?}")]
    MalformedStandbyWal(String),
}

impl SentinelError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> u8 {
        match self {
            SentinelError::Config(_)
            | SentinelError::Kv(_)
            | SentinelError::Bus(_)
            | SentinelError::CandidateProbe(_) => 1,
            SentinelError::NoWalBaseline => 4,
            SentinelError::MalformedStandbyWal(_) => 5,
        }
    }
}
