//! Error types for status-line parsing.

use thiserror::Error;

/// Errors that can occur when parsing a status line or a WAL position.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line contained no tokens at all.
    #[error("empty status line")]
    EmptyLine,

    /// The first token didn't match any known message tag.
    #[error("unknown message tag: {0:?}")]
    UnknownTag(String),

    /// A known tag was followed by the wrong number of tokens.
    #[error("{tag} expects {expected} arguments, got {got}")]
    WrongArgCount {
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    /// A WAL position token was not of the form `<hex>/<hex>`.
    #[error("malformed wal position: {0:?}")]
    MalformedWalPosition(String),
}
