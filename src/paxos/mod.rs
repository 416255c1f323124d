pub mod ballot;
pub mod data;
pub mod delivery;
pub mod dispatcher;
pub mod event;
pub mod follower;
pub mod leader;
pub mod message;
pub mod quorum;
pub mod recoverer;
pub mod retransmit;


pub use ballot::{BallotNumber, Identifier, NodeId, SlotIndex, Tick};
pub use data::{Accept, PaxosAgent, PaxosData, Progress, Role, Value};
pub use dispatcher::PaxosEngine;
pub use event::PaxosInput;
pub use follower::{compute_failover, FailoverDecision};
pub use message::{PaxosMessage, Route};
pub use quorum::{QuorumStrategy, SimpleMajority};
pub use recoverer::recovery_prepares;
pub use retransmit::{contiguous_committable, response_state, ResponseState};
