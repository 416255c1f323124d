//! Wire messages of the consensus protocol.
//!
//! The transport serializes these; the dispatcher classifies each outbound
//! message as a direct reply or a cluster broadcast (see [`Route`]).

use serde::{Deserialize, Serialize};

use super::ballot::{Identifier, NodeId, SlotIndex};
use super::data::{Accept, Progress};

/// Positive answer to a `Prepare`: a promise, with the evidence the
/// proposer needs to pick a safe value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareAck {
    /// The prepare being answered.
    pub request: Identifier,
    /// Responding node.
    pub from: NodeId,
    /// Responder's progress after the promise.
    pub progress: Progress,
    /// Highest slot the responder's journal has an accept for.
    pub highest_accepted: SlotIndex,
    /// Highest leader heartbeat counter the responder has observed.
    pub leader_heartbeat: u64,
    /// The responder's accept for the prepared slot, if it has one.
    pub accepted_for_slot: Option<Accept>,
}

/// Refusal of a `Prepare`: the responder has promised a higher ballot.
/// Carries the responder's progress and heartbeat as failover evidence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareNack {
    /// The prepare being refused.
    pub request: Identifier,
    /// Responding node.
    pub from: NodeId,
    /// Responder's current progress.
    pub progress: Progress,
    /// Highest slot the responder's journal has an accept for.
    pub highest_accepted: SlotIndex,
    /// Highest leader heartbeat counter the responder has observed.
    pub leader_heartbeat: u64,
}

/// Answer to a `Prepare`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareResponse {
    /// Promise granted.
    Ack(PrepareAck),
    /// Promise refused.
    Nack(PrepareNack),
}

impl PrepareResponse {
    /// The prepare identifier this response answers.
    pub fn request(&self) -> &Identifier {
        match self {
            PrepareResponse::Ack(a) => &a.request,
            PrepareResponse::Nack(n) => &n.request,
        }
    }

    /// The responding node.
    pub fn from(&self) -> NodeId {
        match self {
            PrepareResponse::Ack(a) => a.from,
            PrepareResponse::Nack(n) => n.from,
        }
    }

    /// The responder's progress.
    pub fn progress(&self) -> &Progress {
        match self {
            PrepareResponse::Ack(a) => &a.progress,
            PrepareResponse::Nack(n) => &n.progress,
        }
    }

    /// The responder's heartbeat evidence.
    pub fn leader_heartbeat(&self) -> u64 {
        match self {
            PrepareResponse::Ack(a) => a.leader_heartbeat,
            PrepareResponse::Nack(n) => n.leader_heartbeat,
        }
    }

    /// The responder's accept for the prepared slot, if any.
    pub fn accepted_for_slot(&self) -> Option<&Accept> {
        match self {
            PrepareResponse::Ack(a) => a.accepted_for_slot.as_ref(),
            PrepareResponse::Nack(_) => None,
        }
    }
}

/// Positive answer to an `Accept`: the value is journaled at the responder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptAck {
    /// The accept being answered.
    pub request: Identifier,
    /// Responding node.
    pub from: NodeId,
    /// Responder's progress after journaling.
    pub progress: Progress,
}

/// Refusal of an `Accept`: the responder has promised a higher ballot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptNack {
    /// The accept being refused.
    pub request: Identifier,
    /// Responding node.
    pub from: NodeId,
    /// Responder's current progress.
    pub progress: Progress,
}

/// Answer to an `Accept`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptResponse {
    /// Vote granted.
    Ack(AcceptAck),
    /// Vote refused.
    Nack(AcceptNack),
}

impl AcceptResponse {
    /// The accept identifier this response answers.
    pub fn request(&self) -> &Identifier {
        match self {
            AcceptResponse::Ack(a) => &a.request,
            AcceptResponse::Nack(n) => &n.request,
        }
    }

    /// The responding node.
    pub fn from(&self) -> NodeId {
        match self {
            AcceptResponse::Ack(a) => a.from,
            AcceptResponse::Nack(n) => n.from,
        }
    }

    /// True for an ack.
    pub fn is_ack(&self) -> bool {
        matches!(self, AcceptResponse::Ack(_))
    }
}

/// Commit notification: every slot up to and including `id.slot` is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Identifier of the highest newly committed instance.
    pub id: Identifier,
}

/// Leader liveness signal carrying a strictly increasing counter.
///
/// Followers compare counters, never clocks: a follower that has seen
/// counter `c` treats any heartbeat `> c` as proof of a live leader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Monotonic counter originated by the leader.
    pub counter: u64,
}

/// Request for missed slots, sent by a lagging replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitRequest {
    /// Requesting node.
    pub from: NodeId,
    /// Node being asked.
    pub to: NodeId,
    /// Requester's highest committed slot; it needs everything above.
    pub log_index: SlotIndex,
}

/// Missed slots, split into the responder's committed and uncommitted
/// ranges, both slot-ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitResponse {
    /// Responding node.
    pub from: NodeId,
    /// Requesting node.
    pub to: NodeId,
    /// Accepts the responder knows committed.
    pub committed: Vec<Accept>,
    /// Accepts above the responder's commit point.
    pub uncommitted: Vec<Accept>,
}

/// How the dispatcher routes an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Direct to the node the message names, or to the sender of the
    /// triggering message.
    Direct,
    /// To every other cluster member.
    Broadcast,
}

/// Consensus protocol messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaxosMessage {
    /// Phase 1 solicitation, including the low-prepare probe.
    Prepare(Identifier),
    /// Answer to a prepare.
    PrepareResponse(PrepareResponse),
    /// Phase 2 proposal.
    Accept(Accept),
    /// Answer to an accept.
    AcceptResponse(AcceptResponse),
    /// Chosen-value notification.
    Commit(Commit),
    /// Leader liveness counter.
    Heartbeat(Heartbeat),
    /// Gap-filling request.
    RetransmitRequest(RetransmitRequest),
    /// Gap-filling response.
    RetransmitResponse(RetransmitResponse),
}

impl PaxosMessage {
    /// Serialize to bytes using bincode.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("PaxosMessage serialization should not fail")
    }

    /// Deserialize from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Direct-reply vs broadcast classification.
    ///
    /// Requests and proposals fan out to the whole cluster; responses go
    /// back to the node that triggered them.
    pub fn route(&self) -> Route {
        match self {
            PaxosMessage::PrepareResponse(_)
            | PaxosMessage::AcceptResponse(_)
            | PaxosMessage::RetransmitRequest(_)
            | PaxosMessage::RetransmitResponse(_) => Route::Direct,
            PaxosMessage::Prepare(_)
            | PaxosMessage::Accept(_)
            | PaxosMessage::Commit(_)
            | PaxosMessage::Heartbeat(_) => Route::Broadcast,
        }
    }

    /// The node an outbound direct message must reach, when the message
    /// itself names one.
    pub fn direct_target(&self) -> Option<NodeId> {
        match self {
            PaxosMessage::RetransmitRequest(r) => Some(r.to),
            PaxosMessage::RetransmitResponse(r) => Some(r.to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::ballot::BallotNumber;
    use crate::paxos::data::Value;

    #[test]
    fn test_route_classification() {
        let id = Identifier::new(1, BallotNumber::new(1, 1), 5);
        let progress = Progress::default();

        let broadcasts = [
            PaxosMessage::Prepare(id),
            PaxosMessage::Accept(Accept::new(id, Value::NoOp)),
            PaxosMessage::Commit(Commit { id }),
            PaxosMessage::Heartbeat(Heartbeat { counter: 3 }),
        ];
        for msg in &broadcasts {
            assert_eq!(msg.route(), Route::Broadcast, "{msg:?}");
        }

        let directs = [
            PaxosMessage::PrepareResponse(PrepareResponse::Nack(PrepareNack {
                request: id,
                from: 2,
                progress,
                highest_accepted: 0,
                leader_heartbeat: 0,
            })),
            PaxosMessage::AcceptResponse(AcceptResponse::Ack(AcceptAck {
                request: id,
                from: 2,
                progress,
            })),
            PaxosMessage::RetransmitRequest(RetransmitRequest {
                from: 2,
                to: 1,
                log_index: 4,
            }),
            PaxosMessage::RetransmitResponse(RetransmitResponse {
                from: 1,
                to: 2,
                committed: vec![],
                uncommitted: vec![],
            }),
        ];
        for msg in &directs {
            assert_eq!(msg.route(), Route::Direct, "{msg:?}");
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let id = Identifier::new(2, BallotNumber::new(7, 2), 42);
        let msg = PaxosMessage::Accept(Accept::new(
            id,
            Value::ClientCommand {
                msg_id: 11,
                bytes: b"transfer".to_vec(),
            },
        ));
        let decoded = PaxosMessage::deserialize(&msg.serialize()).unwrap();
        assert_eq!(decoded, msg);
    }
}
