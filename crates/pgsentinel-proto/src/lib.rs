//! pgsentinel-proto: the plain-text status grammar spoken on the cluster bus.
//!
//! Every peer watching a cluster publishes and consumes single-line ASCII
//! messages on the cluster's channel. The grammar is deliberately tiny
//! (five message kinds, whitespace-separated tokens) so a human tailing
//! the bus can follow a failover as it happens.
//!
//! # quick start
//!
//! ```
//! use pgsentinel_proto::{StatusMessage, WalPosition};
//!
//! let msg = StatusMessage::parse("+SDOWN pg-m h1 0/50").unwrap();
//! match &msg {
//!     StatusMessage::SDown { voter, wal, .. } => {
//!         assert_eq!(voter, "h1");
//!         assert_eq!(*wal, WalPosition::parse("0/50").unwrap());
//!     }
//!     _ => unreachable!(),
//! }
//!
//! // encode produces exactly the line a peer parses back
//! assert_eq!(msg.encode(), "+SDOWN pg-m h1 0/50");
//! ```

mod error;
mod message;
mod wal;

pub use error::ParseError;
pub use message::StatusMessage;
pub use wal::WalPosition;
