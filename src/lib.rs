//! trireme — a Multi-Paxos replicated state machine core.
//!
//! One [`paxos::PaxosEngine`] per replica. Every input — a peer message, a
//! client command, a timer tick — runs through a single-threaded dispatcher
//! that journals durably, buffers outbound messages, and atomically
//! replaces the replica's agent state. Leadership is lease-free: followers
//! decide failover from heartbeat *evidence* gathered by a low-prepare
//! probe, never from wall clocks.
//!
//! The host supplies the journal (or uses [`journal::FileJournal`]), the
//! transport (or wires replicas through [`network::ChannelNetwork`]), the
//! deterministic command executor, and the timer that drives
//! `CheckTimeout` / `HeartbeatTick` events.

pub mod config;
pub mod error;
pub mod host;
pub mod journal;
pub mod network;
pub mod paxos;

pub use config::PaxosConfig;
pub use error::PaxosError;
pub use host::{Application, ClientReply, Payload, ReplyAddress, Transport};
pub use journal::{FileJournal, Journal, JournalBounds, JournalError, MemJournal};
pub use network::{ChannelEndpoint, ChannelNetwork};
pub use paxos::{
    Accept, BallotNumber, Identifier, NodeId, PaxosAgent, PaxosEngine, PaxosInput, PaxosMessage,
    Progress, Role, SlotIndex, Tick, Value,
};
