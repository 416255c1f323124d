//! Host-facing contracts.
//!
//! The consensus core is transport-, executor- and timer-agnostic: the host
//! supplies a [`Transport`] for moving messages, an [`Application`] that
//! deterministically applies committed commands, and drives the engine with
//! tick events. The core never spawns, sleeps or reads a clock.

use serde::{Deserialize, Serialize};

use crate::paxos::ballot::{NodeId, SlotIndex};
use crate::paxos::message::PaxosMessage;

/// Opaque token the transport resolves back to a client connection.
///
/// The core only echoes it: it is handed in with a command and handed back
/// with the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplyAddress(pub u64);

/// A committed client command handed to the application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Dedupe id, equal to the log slot. A crash between delivery and the
    /// progress write re-delivers the same `delivery_id`; the application
    /// uses it to make re-delivery a no-op.
    pub delivery_id: SlotIndex,
    /// Opaque command bytes.
    pub bytes: Vec<u8>,
}

/// What a client hears back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientReply {
    /// The command committed; `bytes` is the application's result.
    Response {
        /// Echo of the client's message id.
        msg_id: u64,
        /// Result bytes returned by the application.
        bytes: Vec<u8>,
    },
    /// The command reached a node that is not the leader.
    NotLeader {
        /// The node that refused.
        node: NodeId,
        /// Echo of the client's message id.
        msg_id: u64,
    },
    /// The leader lost its epoch with this command still outstanding. The
    /// client must retry; the dedupe id protects against a duplicate apply.
    LostLeadership {
        /// The node that lost leadership.
        node: NodeId,
        /// Echo of the client's message id.
        msg_id: u64,
    },
}

/// Moves messages between replicas and replies back to clients.
///
/// Sends must be synchronous with respect to the dispatcher, or buffered by
/// the host until the event completes: a message for state that was rolled
/// back must never reach the wire.
pub trait Transport {
    /// Deliver `message` to one replica.
    fn send(&mut self, to: NodeId, message: PaxosMessage);

    /// Deliver `message` to every other replica. The core pre-records its
    /// own votes, so loopback to self is not expected.
    fn broadcast(&mut self, message: PaxosMessage);

    /// Resolve `to` back to a client and deliver the reply.
    fn reply(&mut self, to: ReplyAddress, reply: ClientReply);
}

/// The host's deterministic command executor.
///
/// # Laws
///
/// 1. `deliver_client` MUST be deterministic: the same payload produces the
///    same state change and the same result bytes on every replica.
/// 2. `deliver_client` MUST be idempotent with respect to
///    `Payload::delivery_id`: re-delivery after a crash applies nothing and
///    returns the original result.
/// 3. No I/O that can fail non-deterministically; side effects belong in an
///    outbox keyed by the dedupe id.
pub trait Application {
    /// Apply one committed command, returning the reply bytes.
    fn deliver_client(&mut self, payload: Payload) -> Vec<u8>;
}
