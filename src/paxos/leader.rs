//! Leader behaviour: command intake, accept voting, contiguous commit and
//! the heartbeat pulse.

use tracing::{debug, info, warn};

use crate::error::PaxosError;
use crate::host::ReplyAddress;

use super::ballot::Identifier;
use super::data::{Accept, AcceptResponsesAndTimeout, PaxosAgent, Value};
use super::delivery::deliver_one;
use super::event::{backdown, EventCtx};
use super::message::{AcceptAck, AcceptResponse, Commit, Heartbeat, PaxosMessage};

/// Take in a client command: assign the next slot, journal our own accept,
/// broadcast it, and open the tally with our own vote.
pub fn handle_command(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    value: Value,
    reply_to: ReplyAddress,
) -> Result<PaxosAgent, PaxosError> {
    let epoch = match agent.data.epoch {
        Some(epoch) => epoch,
        None => return Ok(backdown(agent, ctx)),
    };
    let slot = agent.data.next_proposal_slot();
    let id = Identifier::new(agent.node_id, epoch, slot);
    let accept = Accept::new(id, value.clone());

    ctx.journal.accept(std::slice::from_ref(&accept))?;
    ctx.send(PaxosMessage::Accept(accept));

    agent.data.client_commands.insert(id, (value, reply_to));
    let timeout = ctx.random_timeout();
    let self_ack = AcceptResponse::Ack(AcceptAck {
        request: id,
        from: agent.node_id,
        progress: agent.data.progress,
    });
    agent.data.accept_responses.insert(
        id,
        AcceptResponsesAndTimeout::opened(timeout, agent.node_id, self_ack),
    );
    debug!(node = agent.node_id, slot, "proposing client command");
    Ok(agent)
}

/// Tally an accept vote. Shared with the recoverer, whose accept phase is
/// the same protocol.
///
/// A nack showing a higher promise means another node holds a newer epoch:
/// leadership is gone. Otherwise votes accumulate until a majority acks,
/// at which point every contiguously acknowledged slot commits.
pub fn handle_accept_response(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    response: AcceptResponse,
) -> Result<PaxosAgent, PaxosError> {
    let epoch = match agent.data.epoch {
        Some(epoch) => epoch,
        None => return Ok(backdown(agent, ctx)),
    };
    let request = *response.request();
    if !agent.data.accept_responses.contains_key(&request) {
        debug!(node = agent.node_id, "accept response for a settled slot");
        return Ok(agent);
    }

    if let AcceptResponse::Nack(nack) = &response {
        if nack.progress.highest_promised > epoch {
            warn!(
                node = agent.node_id,
                from = nack.from,
                "accept refused under a higher promise"
            );
            return Ok(backdown(agent, ctx));
        }
    }

    let cluster_size = agent.data.cluster_size;
    let (acks, nacks) = {
        let entry = match agent.data.accept_responses.get_mut(&request) {
            Some(entry) => entry,
            None => return Ok(agent),
        };
        entry.responses.insert(response.from(), response);
        let acks = entry.responses.values().filter(|r| r.is_ack()).count();
        (acks, entry.responses.len() - acks)
    };

    if ctx.quorum.reached(cluster_size, nacks) {
        return Ok(backdown(agent, ctx));
    }
    if ctx.quorum.reached(cluster_size, acks) {
        commit_acknowledged(&mut agent, ctx)?;
    }
    Ok(agent)
}

/// Commit and deliver every contiguously majority-acknowledged slot,
/// then announce the highest one committed.
fn commit_acknowledged(agent: &mut PaxosAgent, ctx: &mut EventCtx<'_>) -> Result<(), PaxosError> {
    let mut last_committed: Option<Identifier> = None;
    loop {
        let next_slot = agent.data.progress.highest_committed.slot + 1;
        let id = match agent.data.accept_responses.iter().next() {
            Some((id, entry)) if id.slot == next_slot => {
                let acks = entry.responses.values().filter(|r| r.is_ack()).count();
                if !ctx.quorum.reached(agent.data.cluster_size, acks) {
                    break;
                }
                *id
            }
            _ => break,
        };
        let accept = ctx
            .journal
            .accepted(id.slot)?
            .ok_or(PaxosError::MissingAccept { slot: id.slot })?;
        deliver_one(agent, ctx, &accept)?;
        agent.data.accept_responses.remove(&id);
        last_committed = Some(id);
    }
    if let Some(id) = last_committed {
        ctx.send(PaxosMessage::Commit(Commit { id }));
    }
    Ok(())
}

/// Heartbeat pulse: bump the monotonic counter and broadcast it.
pub fn heartbeat_tick(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    let counter = agent.data.leader_heartbeat + 1;
    agent.data.leader_heartbeat = counter;
    ctx.send(PaxosMessage::Heartbeat(Heartbeat { counter }));
    Ok(agent)
}

/// Role timeout: resend accepts whose deadline passed.
pub fn check_timeout(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    agent = resend_expired_accepts(agent, ctx)?;
    agent.data.timeout = ctx.random_timeout();
    Ok(agent)
}

/// Rebroadcast every outstanding accept whose resend deadline has passed,
/// giving each a fresh deadline. The value is reread from the journal: it
/// was durably stored before the first broadcast.
pub fn resend_expired_accepts(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    let expired: Vec<Identifier> = agent
        .data
        .accept_responses
        .iter()
        .filter(|(_, entry)| entry.timeout <= ctx.now)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        let accept = ctx
            .journal
            .accepted(id.slot)?
            .ok_or(PaxosError::MissingAccept { slot: id.slot })?;
        info!(node = agent.node_id, slot = id.slot, "resending accept");
        ctx.send(PaxosMessage::Accept(accept));
        let timeout = ctx.random_timeout();
        if let Some(entry) = agent.data.accept_responses.get_mut(&id) {
            entry.timeout = timeout;
        }
    }
    Ok(agent)
}
