//! The quorum election state machine.
//!
//! Every peer watching a cluster runs one `Election`. The machine consumes
//! the cluster channel one message at a time and advances through four
//! phases: a quorum of `+SDOWN` votes yields a single `+ODOWN` assertion,
//! the first `+ODOWN` seen triggers a standby viability check, a quorum of
//! `+SELECT` votes naming the local host starts promotion, and `+NEWMASTER`
//! ends the run for everyone.
//!
//! Each voting step latches one-way: once this peer has published its own
//! `+ODOWN` (or `+SELECT`, or begun promoting) nothing un-publishes it, so
//! duplicate or reordered deliveries across peers cannot double-fire a
//! side effect.

use std::collections::HashSet;

use pgsentinel_proto::{StatusMessage, WalPosition};

/// Distinct voter identities recorded for one voting phase.
///
/// Append-mostly for the life of the election; `rescind` exists only for
/// `-SDOWN` bookkeeping and never retracts an already-published assertion.
#[derive(Debug, Default, Clone)]
pub struct VoteSet {
    voters: HashSet<String>,
}

impl VoteSet {
    /// Records a vote. Returns `true` if the voter was new.
    pub fn record(&mut self, voter: &str) -> bool {
        self.voters.insert(voter.to_string())
    }

    /// Removes a vote if present; absent voters are silently ignored.
    pub fn rescind(&mut self, voter: &str) -> bool {
        self.voters.remove(voter)
    }

    pub fn count(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }
}

/// Where an election stands. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Consuming the channel, nothing asserted yet.
    Watching,
    /// This peer has published its own `+ODOWN`.
    DeclaredODown,
    /// This peer endorsed itself as successor.
    SelectedSelf,
    /// Quorum endorsed this peer; promotion side effects are running.
    Promoting,
    /// Terminal: promotion announced, or observed from another peer.
    Done,
}

/// What the caller must do next after applying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Publish `+ODOWN <primary> <local_host>` on the cluster channel.
    PublishODown,
    /// Run the standby viability check, then report back through
    /// [`Election::candidate_endorsed`] or [`Election::candidate_refused`].
    CheckCandidate,
    /// Create the trigger file, rewrite the KV primary, publish `+NEWMASTER`.
    BeginPromotion,
    /// Promotion is complete somewhere; terminate cleanly.
    Shutdown,
}

/// One peer's view of a cluster election.
#[derive(Debug)]
pub struct Election {
    local_host: String,
    quorum: usize,
    voted_sdown: VoteSet,
    voted_select: VoteSet,
    last_known_xlog: Option<WalPosition>,
    odown_published: bool,
    select_published: bool,
    promoting: bool,
    phase: Phase,
}

impl Election {
    pub fn new(local_host: impl Into<String>, quorum: usize) -> Self {
        Self {
            local_host: local_host.into(),
            quorum,
            voted_sdown: VoteSet::default(),
            voted_select: VoteSet::default(),
            last_known_xlog: None,
            odown_published: false,
            select_published: false,
            promoting: false,
            phase: Phase::Watching,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Highest primary WAL position seen in any `+SDOWN` so far, used as
    /// the baseline for the standby lag computation.
    pub fn last_known_xlog(&self) -> Option<WalPosition> {
        self.last_known_xlog
    }

    pub fn sdown_votes(&self) -> &VoteSet {
        &self.voted_sdown
    }

    pub fn select_votes(&self) -> &VoteSet {
        &self.voted_select
    }

    /// Applies one channel message in received order and returns the action
    /// the driver must perform, if any.
    pub fn apply(&mut self, msg: &StatusMessage) -> Option<Action> {
        match msg {
            StatusMessage::SDown { voter, wal, .. } => {
                self.voted_sdown.record(voter);
                self.last_known_xlog = Some(match self.last_known_xlog {
                    Some(current) => current.max(*wal),
                    None => *wal,
                });
                if self.voted_sdown.count() >= self.quorum && !self.odown_published {
                    self.odown_published = true;
                    self.advance(Phase::DeclaredODown);
                    return Some(Action::PublishODown);
                }
                None
            }

            StatusMessage::SDownCleared { voter, .. } => {
                // bookkeeping only: a published ODOWN stays published
                self.voted_sdown.rescind(voter);
                None
            }

            StatusMessage::ODown { .. } => {
                if !self.select_published {
                    return Some(Action::CheckCandidate);
                }
                None
            }

            StatusMessage::Select { candidate, voter } => {
                if *candidate == self.local_host {
                    self.voted_select.record(voter);
                    if self.voted_select.count() >= self.quorum && !self.promoting {
                        self.promoting = true;
                        self.advance(Phase::Promoting);
                        return Some(Action::BeginPromotion);
                    }
                }
                None
            }

            StatusMessage::NewMaster => {
                self.advance(Phase::Done);
                Some(Action::Shutdown)
            }
        }
    }

    /// The viability check passed and `+SELECT <candidate>` was published.
    pub fn candidate_endorsed(&mut self, candidate: &str) {
        self.select_published = true;
        if candidate == self.local_host {
            self.advance(Phase::SelectedSelf);
        }
    }

    /// The viability check refused the candidate (lag over threshold).
    ///
    /// The SELECT latch stays open so a later `+ODOWN` retriggers the check;
    /// until then the election stalls where it stands.
    pub fn candidate_refused(&mut self) {}

    /// All promotion side effects have been attempted.
    pub fn promotion_finished(&mut self) {
        self.advance(Phase::Done);
    }

    /// Phases only move forward.
    fn advance(&mut self, to: Phase) {
        if to > self.phase {
            self.phase = to;
        }
    }
}
