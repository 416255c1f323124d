//! Event plumbing shared by every role handler.
//!
//! Handlers never touch the transport: they append to the context's send
//! buffer, and the dispatcher transmits after the handler returns and the
//! journal writes are durable. The context also carries the journal, the
//! host application, the RNG and the quorum strategy, so handlers stay
//! functions from (agent, event) to agent.

use rand::{Rng, RngCore};
use tracing::info;

use crate::config::PaxosConfig;
use crate::host::{Application, ClientReply, ReplyAddress};
use crate::journal::Journal;

use super::ballot::{NodeId, Tick};
use super::data::{PaxosAgent, Role, Value};
use super::message::PaxosMessage;
use super::quorum::QuorumStrategy;

/// One input to the dispatcher.
#[derive(Clone, Debug)]
pub enum PaxosInput {
    /// A protocol message from another replica.
    Message {
        /// Sending replica. Direct replies go back here.
        from: NodeId,
        /// The message.
        message: PaxosMessage,
    },
    /// A client command handed in by the transport.
    Command {
        /// The value to replicate.
        value: Value,
        /// Where the reply goes.
        reply_to: ReplyAddress,
    },
    /// Role timeout check, scheduled by the host timer.
    CheckTimeout,
    /// Leader heartbeat pulse, scheduled at the heartbeat interval.
    HeartbeatTick,
}

/// Per-event context: the clock, the durable and host collaborators, and
/// the send buffer.
pub struct EventCtx<'a> {
    /// Tick at which this event is being processed.
    pub now: Tick,
    /// The durable journal. Writes complete before the handler returns.
    pub journal: &'a mut dyn Journal,
    /// The host's command executor.
    pub app: &'a mut dyn Application,
    /// Randomness for timeout spreading.
    pub rng: &'a mut dyn RngCore,
    /// Vote-counting predicate.
    pub quorum: &'a dyn QuorumStrategy,
    /// Timing configuration.
    pub config: &'a PaxosConfig,
    outbound: Vec<PaxosMessage>,
    replies: Vec<(ReplyAddress, ClientReply)>,
}

impl<'a> EventCtx<'a> {
    /// Build a context for one event.
    pub fn new(
        now: Tick,
        journal: &'a mut dyn Journal,
        app: &'a mut dyn Application,
        rng: &'a mut dyn RngCore,
        quorum: &'a dyn QuorumStrategy,
        config: &'a PaxosConfig,
    ) -> Self {
        EventCtx {
            now,
            journal,
            app,
            rng,
            quorum,
            config,
            outbound: Vec::new(),
            replies: Vec::new(),
        }
    }

    /// Buffer a protocol message for transmission after the event.
    pub fn send(&mut self, message: PaxosMessage) {
        self.outbound.push(message);
    }

    /// Buffer a client reply for transmission after the event.
    pub fn reply(&mut self, to: ReplyAddress, reply: ClientReply) {
        self.replies.push((to, reply));
    }

    /// A fresh role timeout: `now` plus a random interval from the
    /// configured window.
    pub fn random_timeout(&mut self) -> Tick {
        let interval = self
            .rng
            .gen_range(self.config.leader_timeout_min..self.config.leader_timeout_max);
        self.now + interval
    }

    /// Drain the buffered sends, in append order.
    pub fn finish(self) -> (Vec<PaxosMessage>, Vec<(ReplyAddress, ClientReply)>) {
        (self.outbound, self.replies)
    }
}

/// Fall back to Follower.
///
/// Clears all outstanding votes, answers every pending client command with
/// a leadership-lost error, drops the epoch and takes a fresh timeout.
/// Heartbeat evidence is kept: it is observation, not role state.
pub fn backdown(mut agent: PaxosAgent, ctx: &mut EventCtx<'_>) -> PaxosAgent {
    if agent.role != Role::Follower {
        info!(
            node = agent.node_id,
            from = ?agent.role,
            "backing down to follower"
        );
    }
    let commands = std::mem::take(&mut agent.data.client_commands);
    for (_, (value, reply_to)) in commands {
        ctx.reply(
            reply_to,
            ClientReply::LostLeadership {
                node: agent.node_id,
                msg_id: value.client_msg_id().unwrap_or(0),
            },
        );
    }
    agent.role = Role::Follower;
    agent.data.prepare_responses.clear();
    agent.data.accept_responses.clear();
    agent.data.epoch = None;
    agent.data.timeout = ctx.random_timeout();
    agent
}
