//! The event pump.
//!
//! Single-threaded and cooperative: each event builds a context with an
//! empty send buffer, runs the exhaustive (role × message) dispatch, then
//! transmits the buffered messages and atomically replaces the agent. Any
//! journal write a handler asked for completed before the handler returned,
//! so nothing reaches the wire ahead of its durable state.

use rand::rngs::ThreadRng;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::config::PaxosConfig;
use crate::error::PaxosError;
use crate::host::{Application, ClientReply, Transport};
use crate::journal::Journal;

use super::ballot::{NodeId, Tick};
use super::data::{PaxosAgent, Progress, Role};
use super::event::{backdown, EventCtx, PaxosInput};
use super::message::{PaxosMessage, Route};
use super::quorum::{QuorumStrategy, SimpleMajority};
use super::{follower, leader, recoverer, retransmit};

/// One replica's consensus engine: the agent plus its collaborators.
pub struct PaxosEngine<J, T, A, R = ThreadRng>
where
    J: Journal,
    T: Transport,
    A: Application,
    R: RngCore,
{
    agent: Option<PaxosAgent>,
    journal: J,
    transport: T,
    app: A,
    rng: R,
    quorum: Box<dyn QuorumStrategy>,
    config: PaxosConfig,
}

impl<J, T, A> PaxosEngine<J, T, A, ThreadRng>
where
    J: Journal,
    T: Transport,
    A: Application,
{
    /// Boot an engine with the thread-local CSPRNG.
    ///
    /// Loads progress from the journal and starts as a follower whose first
    /// timeout is a random interval from `now`.
    pub fn new(
        node_id: NodeId,
        cluster_size: u32,
        config: PaxosConfig,
        journal: J,
        transport: T,
        app: A,
        now: Tick,
    ) -> Result<Self, PaxosError> {
        Self::with_rng(
            node_id,
            cluster_size,
            config,
            journal,
            transport,
            app,
            now,
            rand::thread_rng(),
        )
    }
}

impl<J, T, A, R> PaxosEngine<J, T, A, R>
where
    J: Journal,
    T: Transport,
    A: Application,
    R: RngCore,
{
    /// Boot an engine with an explicit RNG. Tests seed a deterministic one.
    pub fn with_rng(
        node_id: NodeId,
        cluster_size: u32,
        config: PaxosConfig,
        mut journal: J,
        transport: T,
        app: A,
        now: Tick,
        mut rng: R,
    ) -> Result<Self, PaxosError> {
        let progress = journal.load_progress()?;
        let timeout =
            now + rng.gen_range(config.leader_timeout_min..config.leader_timeout_max);
        let agent = PaxosAgent::new(node_id, progress, cluster_size, timeout);
        Ok(PaxosEngine {
            agent: Some(agent),
            journal,
            transport,
            app,
            rng,
            quorum: Box::new(SimpleMajority),
            config,
        })
    }

    /// Replace the quorum strategy.
    pub fn with_quorum(mut self, quorum: Box<dyn QuorumStrategy>) -> Self {
        self.quorum = quorum;
        self
    }

    /// Process one input at tick `now`.
    ///
    /// Returns an error only on a fatal condition; the engine then refuses
    /// further events and the replica must restart from its journal.
    pub fn handle(&mut self, now: Tick, input: PaxosInput) -> Result<(), PaxosError> {
        let agent = self.agent.take().ok_or(PaxosError::Halted)?;
        let reply_to_sender = match &input {
            PaxosInput::Message { from, .. } => Some(*from),
            _ => None,
        };

        let mut ctx = EventCtx::new(
            now,
            &mut self.journal,
            &mut self.app,
            &mut self.rng,
            self.quorum.as_ref(),
            &self.config,
        );
        let next = dispatch(agent, input, &mut ctx)?;
        let (outbound, replies) = ctx.finish();

        for message in outbound {
            match message.route() {
                Route::Broadcast => self.transport.broadcast(message),
                Route::Direct => match message.direct_target().or(reply_to_sender) {
                    Some(to) => self.transport.send(to, message),
                    None => debug!("direct message with no addressee, dropping"),
                },
            }
        }
        for (to, reply) in replies {
            self.transport.reply(to, reply);
        }

        self.agent = Some(next);
        Ok(())
    }

    /// The current agent, absent only after a fatal error.
    pub fn agent(&self) -> Option<&PaxosAgent> {
        self.agent.as_ref()
    }

    /// The current role.
    pub fn role(&self) -> Option<Role> {
        self.agent.as_ref().map(|agent| agent.role)
    }

    /// The current progress.
    pub fn progress(&self) -> Option<Progress> {
        self.agent.as_ref().map(|agent| agent.data.progress)
    }

    /// The journal, for inspection.
    pub fn journal(&self) -> &J {
        &self.journal
    }

    /// The application, for inspection.
    pub fn app(&self) -> &A {
        &self.app
    }

    /// The transport, for hosts that pump an inbox through it.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable transport access.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// The exhaustive (input × role) transition table.
fn dispatch(
    agent: PaxosAgent,
    input: PaxosInput,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    match input {
        PaxosInput::Command { value, reply_to } => match agent.role {
            Role::Leader => leader::handle_command(agent, ctx, value, reply_to),
            Role::Follower | Role::Recoverer => {
                ctx.reply(
                    reply_to,
                    ClientReply::NotLeader {
                        node: agent.node_id,
                        msg_id: value.client_msg_id().unwrap_or(0),
                    },
                );
                Ok(agent)
            }
        },
        PaxosInput::CheckTimeout => match agent.role {
            Role::Follower => follower::check_timeout(agent, ctx),
            Role::Recoverer => recoverer::check_timeout(agent, ctx),
            Role::Leader => leader::check_timeout(agent, ctx),
        },
        PaxosInput::HeartbeatTick => match agent.role {
            Role::Leader => leader::heartbeat_tick(agent, ctx),
            Role::Follower | Role::Recoverer => Ok(agent),
        },
        PaxosInput::Message { from, message } => dispatch_message(agent, from, message, ctx),
    }
}

fn dispatch_message(
    mut agent: PaxosAgent,
    from: NodeId,
    message: PaxosMessage,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    match message {
        PaxosMessage::Prepare(id) => match agent.role {
            Role::Follower => follower::handle_prepare(agent, ctx, id),
            Role::Recoverer | Role::Leader => {
                // A lower prepare gets the acceptor's nack; a higher one
                // ends this node's claim first, then gets its promise.
                if outranks_epoch(&agent, id.number) {
                    agent = backdown(agent, ctx);
                }
                follower::handle_prepare(agent, ctx, id)
            }
        },
        PaxosMessage::PrepareResponse(response) => match agent.role {
            Role::Follower => follower::handle_prepare_response(agent, ctx, response),
            Role::Recoverer => recoverer::handle_prepare_response(agent, ctx, response),
            Role::Leader => {
                debug!(node = agent.node_id, "prepare response while leading");
                Ok(agent)
            }
        },
        PaxosMessage::Accept(accept) => match agent.role {
            Role::Follower => follower::handle_accept(agent, ctx, accept),
            Role::Recoverer | Role::Leader => {
                if outranks_epoch(&agent, accept.id.number) {
                    agent = backdown(agent, ctx);
                }
                follower::handle_accept(agent, ctx, accept)
            }
        },
        PaxosMessage::AcceptResponse(response) => match agent.role {
            Role::Follower => {
                debug!(node = agent.node_id, "accept response while following");
                Ok(agent)
            }
            Role::Recoverer => recoverer::handle_accept_response(agent, ctx, response),
            Role::Leader => leader::handle_accept_response(agent, ctx, response),
        },
        PaxosMessage::Commit(commit) => match agent.role {
            Role::Follower => follower::handle_commit(agent, ctx, from, commit),
            Role::Recoverer | Role::Leader => {
                if outranks_epoch(&agent, commit.id.number) {
                    let agent = backdown(agent, ctx);
                    follower::handle_commit(agent, ctx, from, commit)
                } else {
                    debug!(node = agent.node_id, "commit from a superseded leader");
                    Ok(agent)
                }
            }
        },
        PaxosMessage::Heartbeat(heartbeat) => match agent.role {
            Role::Follower => follower::handle_heartbeat(agent, ctx, heartbeat),
            Role::Recoverer | Role::Leader => {
                // Track the counter as observation; no role change without
                // ballot evidence.
                if heartbeat.counter > agent.data.leader_heartbeat {
                    agent.data.leader_heartbeat = heartbeat.counter;
                }
                Ok(agent)
            }
        },
        PaxosMessage::RetransmitRequest(request) => retransmit::handle_request(agent, ctx, request),
        PaxosMessage::RetransmitResponse(response) => match agent.role {
            Role::Follower => retransmit::apply_response(agent, ctx, response),
            Role::Recoverer | Role::Leader => {
                debug!(node = agent.node_id, "retransmit response while not following");
                Ok(agent)
            }
        },
    }
}

/// True when a ballot from another proposer outranks this node's epoch.
fn outranks_epoch(agent: &PaxosAgent, number: super::ballot::BallotNumber) -> bool {
    match agent.data.epoch {
        Some(epoch) => number > epoch,
        None => true,
    }
}
