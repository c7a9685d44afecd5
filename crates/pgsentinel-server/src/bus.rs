//! Typed façade over the pub/sub bus.
//!
//! The bus is an external collaborator: it delivers each channel's messages
//! to every subscriber in publish order, at least once. Duplicates are
//! tolerated by the election latches, so neither backend deduplicates.
//!
//! [`MemoryBus`] runs whole fleets in-process for tests; [`TcpBus`] is a
//! thin line-protocol client for an external bus master.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Buffered messages per subscription before a slow consumer starts
/// missing lines. Status traffic is a handful of transitions per failover,
/// so this is generous.
const CHANNEL_CAPACITY: usize = 256;

/// Errors from a bus backend.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus connection closed")]
    Closed,
}

/// A live subscription to one channel.
///
/// Lines arrive in publish order. `None` means the subscription is dead and
/// the consumer should treat the bus as gone.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn from_receiver(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// The pub/sub transport the daemon coordinates over.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    async fn publish(&self, channel: &str, line: &str) -> Result<(), BusError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}

/// In-process bus: one broadcast channel per name.
#[derive(Debug, Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, line: &str) -> Result<(), BusError> {
        // no subscribers yet is fine; the line is simply unobserved
        let _ = self.sender(channel).send(line.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let mut rx = self.sender(channel).subscribe();
        let (tx, out) = mpsc::channel(CHANNEL_CAPACITY);
        let name = channel.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(line) => {
                        if tx.send(line).await.is_err() {
                            break; // subscriber dropped
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(channel = %name, missed, "subscriber fell behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::from_receiver(out))
    }
}

/// Thin client for an external line-protocol bus master.
///
/// Wire format, one frame per line:
///
/// ```text
/// client → master   PUB <channel> <payload>
/// client → master   SUB <channel>
/// master → client   MSG <channel> <payload>
/// ```
///
/// Publishes open a short-lived connection; a subscription holds one open
/// for its lifetime and ends when the master closes it.
#[derive(Debug, Clone)]
pub struct TcpBus {
    addr: String,
}

impl TcpBus {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Bus for TcpBus {
    async fn publish(&self, channel: &str, line: &str) -> Result<(), BusError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream
            .write_all(format!("PUB {channel} {line}\n").as_bytes())
            .await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream
            .write_all(format!("SUB {channel}\n").as_bytes())
            .await?;

        let (tx, out) = mpsc::channel(CHANNEL_CAPACITY);
        let want = channel.to_string();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(frame)) => {
                        let Some((name, payload)) = frame
                            .strip_prefix("MSG ")
                            .and_then(|rest| rest.split_once(' '))
                        else {
                            warn!(frame = %frame, "ignoring malformed bus frame");
                            continue;
                        };
                        if name != want {
                            continue;
                        }
                        if tx.send(payload.to_string()).await.is_err() {
                            break; // subscriber dropped
                        }
                    }
                    Ok(None) => break, // master closed the stream
                    Err(err) => {
                        warn!(error = %err, "bus subscription read failed");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::from_receiver(out))
    }
}
