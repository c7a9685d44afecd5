//! The five status messages of the failover protocol.
//!
//! Wire format: one ASCII line per message, tokens separated by whitespace.
//!
//! ```text
//! +SDOWN <primary_fqdn> <voter_host> <wal_pos>   one peer saw the primary down
//! -SDOWN <primary_fqdn> <voter_host>             that peer saw it recover
//! +ODOWN <primary_fqdn> <voter_host>             quorum of peers agree it is down
//! +SELECT <candidate_fqdn> <voter_host>          endorse a successor
//! +NEWMASTER                                     promotion complete, everyone exits
//! ```

use crate::error::ParseError;
use crate::wal::WalPosition;

/// A single status line exchanged on a cluster channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    /// A voter's local opinion that the primary is unreachable, together
    /// with the last primary WAL position that voter observed.
    SDown {
        primary: String,
        voter: String,
        wal: WalPosition,
    },

    /// The voter reached the primary again; its earlier `SDown` is rescinded.
    SDownCleared { primary: String, voter: String },

    /// An elector observed a quorum of `SDown` votes and asserts the primary
    /// is objectively down.
    ODown { primary: String, voter: String },

    /// The voter endorses `candidate` as the new primary.
    Select { candidate: String, voter: String },

    /// Promotion has happened; all electors terminate.
    NewMaster,
}

impl StatusMessage {
    /// Parses one status line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (&tag, args) = tokens.split_first().ok_or(ParseError::EmptyLine)?;

        match tag {
            "+SDOWN" => {
                let [primary, voter, wal] = expect_args("+SDOWN", args)?;
                Ok(StatusMessage::SDown {
                    primary: primary.to_string(),
                    voter: voter.to_string(),
                    wal: WalPosition::parse(wal)?,
                })
            }
            "-SDOWN" => {
                let [primary, voter] = expect_args("-SDOWN", args)?;
                Ok(StatusMessage::SDownCleared {
                    primary: primary.to_string(),
                    voter: voter.to_string(),
                })
            }
            "+ODOWN" => {
                let [primary, voter] = expect_args("+ODOWN", args)?;
                Ok(StatusMessage::ODown {
                    primary: primary.to_string(),
                    voter: voter.to_string(),
                })
            }
            "+SELECT" => {
                let [candidate, voter] = expect_args("+SELECT", args)?;
                Ok(StatusMessage::Select {
                    candidate: candidate.to_string(),
                    voter: voter.to_string(),
                })
            }
            "+NEWMASTER" => {
                let [] = expect_args("+NEWMASTER", args)?;
                Ok(StatusMessage::NewMaster)
            }
            other => Err(ParseError::UnknownTag(other.to_string())),
        }
    }

    /// Renders the message as the exact line `parse` accepts back.
    pub fn encode(&self) -> String {
        match self {
            StatusMessage::SDown {
                primary,
                voter,
                wal,
            } => format!("+SDOWN {primary} {voter} {wal}"),
            StatusMessage::SDownCleared { primary, voter } => {
                format!("-SDOWN {primary} {voter}")
            }
            StatusMessage::ODown { primary, voter } => format!("+ODOWN {primary} {voter}"),
            StatusMessage::Select { candidate, voter } => {
                format!("+SELECT {candidate} {voter}")
            }
            StatusMessage::NewMaster => "+NEWMASTER".to_string(),
        }
    }
}

/// Checks the argument count for `tag` and returns the tokens as an array.
fn expect_args<'a, const N: usize>(
    tag: &'static str,
    args: &[&'a str],
) -> Result<[&'a str; N], ParseError> {
    <[&str; N]>::try_from(args).map_err(|_| ParseError::WrongArgCount {
        tag,
        expected: N,
        got: args.len(),
    })
}
