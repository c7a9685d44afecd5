//! Minimal PostgreSQL wire probe.
//!
//! The daemon needs exactly one thing from the database: a single text
//! value from a single-row query, over a fresh connection, fast. That is
//! not worth a driver dependency, so this speaks just enough of the v3
//! protocol to start up (trust authentication), run one simple query, and
//! read the first column of the first row.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use pgsentinel_cluster::Endpoint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::db::{ProbeError, WalProbe};

/// Protocol version 3.0.
const PROTOCOL_VERSION: i32 = 196_608;

/// Upper bound on a backend message body. The replies we ever read are a
/// few hundred bytes; anything larger is a broken or hostile peer.
const MAX_MESSAGE_LEN: usize = 64 * 1024;

// backend message tags
const MSG_AUTH: u8 = b'R';
const MSG_ERROR: u8 = b'E';
const MSG_READY: u8 = b'Z';
const MSG_DATA_ROW: u8 = b'D';

/// WAL probe speaking the PostgreSQL wire protocol.
#[derive(Debug, Clone)]
pub struct PostgresProbe {
    user: String,
}

impl PostgresProbe {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    /// Connects, authenticates, runs `sql`, and returns the first column of
    /// the first row.
    async fn query_one(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
        sql: &str,
    ) -> Result<String, ProbeError> {
        let mut stream = TcpStream::connect((endpoint.ip.as_str(), endpoint.port))
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;

        stream
            .write_all(&startup_packet(&self.user, dbname))
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;

        // drain the startup phase: auth ok, parameter statuses, key data
        loop {
            let (tag, payload) = read_backend_message(&mut stream).await?;
            match tag {
                MSG_AUTH => check_auth_ok(&payload)?,
                MSG_ERROR => return Err(ProbeError::Query(error_message(&payload))),
                MSG_READY => break,
                _ => {}
            }
        }

        stream
            .write_all(&query_packet(sql))
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;

        let mut value = None;
        loop {
            let (tag, payload) = read_backend_message(&mut stream).await?;
            match tag {
                MSG_DATA_ROW => value = Some(parse_data_row(&payload)?),
                MSG_ERROR => return Err(ProbeError::Query(error_message(&payload))),
                MSG_READY => break,
                _ => {} // RowDescription, CommandComplete, notices
            }
        }

        value.ok_or_else(|| ProbeError::Query("query returned no rows".into()))
    }
}

#[async_trait]
impl WalProbe for PostgresProbe {
    async fn current_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, ProbeError> {
        self.query_one(endpoint, dbname, "SELECT pg_current_wal_lsn()::text")
            .await
    }

    async fn last_received_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, ProbeError> {
        self.query_one(endpoint, dbname, "SELECT pg_last_wal_receive_lsn()::text")
            .await
    }
}

/// StartupMessage: length, protocol version, then `key\0value\0` pairs and a
/// terminating NUL. The length prefix includes itself.
fn startup_packet(user: &str, dbname: &str) -> BytesMut {
    let mut body = BytesMut::with_capacity(64);
    body.put_i32(PROTOCOL_VERSION);
    for (key, value) in [("user", user), ("database", dbname)] {
        body.put_slice(key.as_bytes());
        body.put_u8(0);
        body.put_slice(value.as_bytes());
        body.put_u8(0);
    }
    body.put_u8(0);

    let mut packet = BytesMut::with_capacity(body.len() + 4);
    packet.put_i32(body.len() as i32 + 4);
    packet.put_slice(&body);
    packet
}

/// Query message: tag `Q`, length (self-inclusive), NUL-terminated SQL.
fn query_packet(sql: &str) -> BytesMut {
    let mut packet = BytesMut::with_capacity(sql.len() + 6);
    packet.put_u8(b'Q');
    packet.put_i32(sql.len() as i32 + 5);
    packet.put_slice(sql.as_bytes());
    packet.put_u8(0);
    packet
}

/// Reads one backend message: tag byte, self-inclusive i32 length, body.
async fn read_backend_message(stream: &mut TcpStream) -> Result<(u8, Vec<u8>), ProbeError> {
    let mut head = [0u8; 5];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| ProbeError::Connection(e.to_string()))?;

    let tag = head[0];
    let len = i32::from_be_bytes([head[1], head[2], head[3], head[4]]);
    if len < 4 || len as usize - 4 > MAX_MESSAGE_LEN {
        return Err(ProbeError::Query(format!(
            "implausible message length {len} for tag {:?}",
            tag as char
        )));
    }

    let mut payload = vec![0u8; len as usize - 4];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| ProbeError::Connection(e.to_string()))?;
    Ok((tag, payload))
}

/// Accepts AuthenticationOk and nothing else; the probe carries no
/// credentials.
fn check_auth_ok(payload: &[u8]) -> Result<(), ProbeError> {
    if payload.len() < 4 {
        return Err(ProbeError::Query("truncated authentication reply".into()));
    }
    let code = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if code != 0 {
        return Err(ProbeError::Query(format!(
            "server requested authentication method {code}, only trust is supported"
        )));
    }
    Ok(())
}

/// First column of a DataRow: i16 column count, then per column a length
/// prefix and that many bytes. A SQL NULL (length -1) means the server has
/// no position to report, e.g. the receive location on a non-standby.
fn parse_data_row(payload: &[u8]) -> Result<String, ProbeError> {
    let malformed = || ProbeError::Query("malformed data row".into());

    if payload.len() < 6 {
        return Err(malformed());
    }
    let columns = i16::from_be_bytes([payload[0], payload[1]]);
    if columns < 1 {
        return Err(malformed());
    }
    let len = i32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
    if len == -1 {
        return Err(ProbeError::Query("server reported no wal position".into()));
    }
    let len = usize::try_from(len).map_err(|_| malformed())?;
    let bytes = payload.get(6..6 + len).ok_or_else(malformed)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed())
}

/// Pulls the human-readable message field out of an ErrorResponse.
///
/// The body is a sequence of `(field_code, cstring)` pairs ended by a NUL;
/// field `M` is the message.
fn error_message(payload: &[u8]) -> String {
    let mut rest = payload;
    while let Some((&code, tail)) = rest.split_first() {
        if code == 0 {
            break;
        }
        let end = match tail.iter().position(|&b| b == 0) {
            Some(end) => end,
            None => break,
        };
        if code == b'M' {
            return String::from_utf8_lossy(&tail[..end]).into_owned();
        }
        rest = &tail[end + 1..];
    }
    "unknown server error".into()
}
