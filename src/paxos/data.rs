//! The agent value: everything one replica's consensus engine knows.
//!
//! The agent is treated as an immutable value by the dispatcher — handlers
//! take it, build the successor state, and hand it back. The only durable
//! part is [`Progress`]; everything else is rebuilt from the journal and
//! the wire after a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ballot::{BallotNumber, Identifier, NodeId, SlotIndex, Tick};
use super::message::{AcceptResponse, PrepareResponse};
use crate::host::ReplyAddress;

/// The durable consensus record.
///
/// INVARIANT: `highest_committed.number <= highest_promised`.
/// INVARIANT: `highest_committed.slot` never decreases, across crashes
/// included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Highest ballot this node has promised not to undercut.
    pub highest_promised: BallotNumber,
    /// Identifier of the highest slot known committed and delivered.
    pub highest_committed: Identifier,
}

impl Progress {
    /// Create a progress record.
    pub fn new(highest_promised: BallotNumber, highest_committed: Identifier) -> Self {
        Progress {
            highest_promised,
            highest_committed,
        }
    }

    /// Progress with a raised promise.
    pub fn promise(&self, number: BallotNumber) -> Self {
        Progress {
            highest_promised: number,
            ..*self
        }
    }

    /// Progress with a new committed identifier.
    pub fn commit(&self, id: Identifier) -> Self {
        Progress {
            highest_committed: id,
            ..*self
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress {
            highest_promised: BallotNumber::new(0, 0),
            highest_committed: Identifier::new(0, BallotNumber::new(0, 0), 0),
        }
    }
}

/// A value carried through consensus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Slot filler chosen during recovery; delivers no client side effects.
    NoOp,
    /// An application command submitted by a client.
    ClientCommand {
        /// Client-chosen message id, echoed in the reply.
        msg_id: u64,
        /// Opaque command bytes for the host executor.
        bytes: Vec<u8>,
    },
    /// Cluster reconfiguration. Carried and journaled, but delivery is not
    /// yet implemented.
    MembershipChange(Vec<u8>),
}

impl Value {
    /// The client message id, for values that originate from a client.
    pub fn client_msg_id(&self) -> Option<u64> {
        match self {
            Value::ClientCommand { msg_id, .. } => Some(*msg_id),
            Value::NoOp | Value::MembershipChange(_) => None,
        }
    }
}

/// A value accepted for one slot under one ballot.
///
/// At most one `Accept` per slot is durably stored for the node's current
/// promise; a repromise may overwrite accepts stored under lower ballots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    /// Which instance this acceptance belongs to.
    pub id: Identifier,
    /// The accepted value.
    pub value: Value,
}

impl Accept {
    /// Create an accept record.
    pub fn new(id: Identifier, value: Value) -> Self {
        Accept { id, value }
    }
}

/// Vote tally for one outstanding accept, plus its resend deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptResponsesAndTimeout {
    /// Tick at which the accept is rebroadcast if still unresolved.
    pub timeout: Tick,
    /// Votes received so far, by responder.
    pub responses: BTreeMap<NodeId, AcceptResponse>,
}

impl AcceptResponsesAndTimeout {
    /// Open a tally seeded with this node's own vote.
    pub fn opened(timeout: Tick, node: NodeId, self_vote: AcceptResponse) -> Self {
        let mut responses = BTreeMap::new();
        responses.insert(node, self_vote);
        AcceptResponsesAndTimeout { timeout, responses }
    }
}

/// The role a replica currently plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Acceptor following a (presumed) live leader.
    Follower,
    /// Running phase 1 over the uncommitted tail after deciding to fail over.
    Recoverer,
    /// Holds the current epoch and drives accepts and commits.
    Leader,
}

/// Mutable consensus state, replaced wholesale on every event.
#[derive(Clone, Debug)]
pub struct PaxosData {
    /// Durable progress, mirrored in the journal.
    pub progress: Progress,
    /// Number of members in the cluster.
    pub cluster_size: u32,
    /// Highest heartbeat counter observed from any leader.
    pub leader_heartbeat: u64,
    /// Tick at which the current role times out.
    pub timeout: Tick,
    /// Outstanding prepare votes, by prepare identifier, in slot order.
    pub prepare_responses: BTreeMap<Identifier, BTreeMap<NodeId, PrepareResponse>>,
    /// The promise made to self when becoming leader; the ballot on every
    /// accept this node emits.
    pub epoch: Option<BallotNumber>,
    /// Outstanding accept votes, by accept identifier, in slot order.
    pub accept_responses: BTreeMap<Identifier, AcceptResponsesAndTimeout>,
    /// Client commands awaiting commit, with where to send the reply.
    pub client_commands: BTreeMap<Identifier, (Value, ReplyAddress)>,
}

impl PaxosData {
    /// Fresh data for a replica booting from journaled progress.
    pub fn new(progress: Progress, cluster_size: u32, timeout: Tick) -> Self {
        PaxosData {
            progress,
            cluster_size,
            leader_heartbeat: 0,
            timeout,
            prepare_responses: BTreeMap::new(),
            epoch: None,
            accept_responses: BTreeMap::new(),
            client_commands: BTreeMap::new(),
        }
    }

    /// The slot a leader assigns to the next client command: one past the
    /// highest slot it has in flight or committed.
    pub fn next_proposal_slot(&self) -> SlotIndex {
        let in_flight = self
            .accept_responses
            .keys()
            .next_back()
            .map(|id| id.slot)
            .unwrap_or(SlotIndex::MIN);
        let pending = self
            .client_commands
            .keys()
            .next_back()
            .map(|id| id.slot)
            .unwrap_or(SlotIndex::MIN);
        in_flight
            .max(pending)
            .max(self.progress.highest_committed.slot)
            + 1
    }
}

/// One replica's consensus agent: identity, role and state.
#[derive(Clone, Debug)]
pub struct PaxosAgent {
    /// This replica's id.
    pub node_id: NodeId,
    /// Current role.
    pub role: Role,
    /// Current state.
    pub data: PaxosData,
}

impl PaxosAgent {
    /// Boot agent: always a follower, with journal-loaded progress.
    pub fn new(node_id: NodeId, progress: Progress, cluster_size: u32, timeout: Tick) -> Self {
        PaxosAgent {
            node_id,
            role: Role::Follower,
            data: PaxosData::new(progress, cluster_size, timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_default_is_floor() {
        let p = Progress::default();
        assert_eq!(p.highest_promised, BallotNumber::new(0, 0));
        assert_eq!(p.highest_committed.slot, 0);
        assert!(BallotNumber::LOW < p.highest_promised);
    }

    #[test]
    fn test_next_proposal_slot_from_committed() {
        let mut data = PaxosData::new(Progress::default(), 3, 100);
        data.progress.highest_committed.slot = 7;
        assert_eq!(data.next_proposal_slot(), 8);
    }

    #[test]
    fn test_next_proposal_slot_tracks_in_flight() {
        let mut data = PaxosData::new(Progress::default(), 3, 100);
        data.progress.highest_committed.slot = 7;
        let epoch = BallotNumber::new(2, 1);
        let id = Identifier::new(1, epoch, 9);
        data.client_commands
            .insert(id, (Value::NoOp, ReplyAddress(0)));
        assert_eq!(data.next_proposal_slot(), 10);
    }
}
