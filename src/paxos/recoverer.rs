//! Recovery: phase 1 over the uncommitted tail, then promotion to leader.
//!
//! A failing-over follower promises itself a ballot above everything it has
//! seen, prepares every slot from its commit point to one past its journal's
//! top, and re-proposes the highest-ballot accept a majority reports for
//! each slot — or a no-op where nobody reports one. Once the whole range is
//! committed it is the leader.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::PaxosError;

use super::ballot::{BallotNumber, Identifier, NodeId};
use super::data::{
    Accept, AcceptResponsesAndTimeout, PaxosAgent, PaxosData, Progress, Role, Value,
};
use super::event::{backdown, EventCtx};
use super::leader;
use super::message::{
    AcceptAck, AcceptResponse, PaxosMessage, PrepareAck, PrepareResponse,
};
use crate::journal::JournalBounds;

/// The prepares a failing-over node must issue, given its progress and its
/// local journal bounds.
///
/// The range runs from the slot after the highest committed one to one past
/// the highest locally accepted slot, and is never empty. The top of the
/// range deliberately comes from the local journal only; higher accepted
/// slots reported by responders are not consulted.
pub fn recovery_prepares(
    progress: &Progress,
    node_id: NodeId,
    bounds: &JournalBounds,
) -> Vec<Identifier> {
    let highest = progress
        .highest_promised
        .max(progress.highest_committed.number);
    let number = BallotNumber::new(highest.counter + 1, node_id);
    let first = progress.highest_committed.slot + 1;
    let last = (bounds.max + 1).max(first);
    (first..=last)
        .map(|slot| Identifier::new(node_id, number, slot))
        .collect()
}

/// Promote a follower that has decided to fail over.
///
/// The self-promise is journaled before anything reaches the wire, and each
/// prepare starts its tally with this node's own ack.
pub fn promote(mut agent: PaxosAgent, ctx: &mut EventCtx<'_>) -> Result<PaxosAgent, PaxosError> {
    let bounds = ctx.journal.bounds()?;
    let prepares = recovery_prepares(&agent.data.progress, agent.node_id, &bounds);
    let number = match prepares.first() {
        Some(prepare) => prepare.number,
        None => {
            // recovery_prepares never returns an empty range.
            return Ok(backdown(agent, ctx));
        }
    };

    let progress = agent.data.progress.promise(number);
    ctx.journal.save_progress(&progress)?;
    agent.data.progress = progress;
    agent.data.epoch = Some(number);
    agent.data.prepare_responses.clear();
    agent.data.accept_responses.clear();

    for prepare in &prepares {
        let self_ack = PrepareResponse::Ack(PrepareAck {
            request: *prepare,
            from: agent.node_id,
            progress,
            highest_accepted: bounds.max,
            leader_heartbeat: agent.data.leader_heartbeat,
            accepted_for_slot: ctx.journal.accepted(prepare.slot)?,
        });
        let mut votes = BTreeMap::new();
        votes.insert(agent.node_id, self_ack);
        agent.data.prepare_responses.insert(*prepare, votes);
        ctx.send(PaxosMessage::Prepare(*prepare));
    }

    agent.role = Role::Recoverer;
    agent.data.timeout = ctx.random_timeout();
    info!(
        node = agent.node_id,
        counter = number.counter,
        slots = prepares.len(),
        "recovering leadership"
    );
    Ok(agent)
}

/// A vote for one of the outstanding recovery prepares.
pub fn handle_prepare_response(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    response: PrepareResponse,
) -> Result<PaxosAgent, PaxosError> {
    let epoch = match agent.data.epoch {
        Some(epoch) => epoch,
        None => return Ok(backdown(agent, ctx)),
    };
    let request = *response.request();
    if !agent.data.prepare_responses.contains_key(&request) {
        debug!(node = agent.node_id, "prepare response for a settled slot");
        return Ok(agent);
    }

    let cluster_size = agent.data.cluster_size;
    let vote_count = {
        let votes = agent.data.prepare_responses.entry(request).or_default();
        votes.insert(response.from(), response);
        votes.len()
    };
    if !ctx.quorum.reached(cluster_size, vote_count) {
        return Ok(agent);
    }

    let votes = match agent.data.prepare_responses.remove(&request) {
        Some(votes) => votes,
        None => return Ok(agent),
    };

    if votes
        .values()
        .any(|vote| vote.progress().highest_promised > epoch)
    {
        return Ok(backdown(agent, ctx));
    }

    // The classic safety rule: re-propose the accept with the highest
    // ballot any voter reports; a slot nobody has accepted gets a no-op.
    let value = votes
        .values()
        .filter_map(|vote| vote.accepted_for_slot())
        .max_by(|a, b| a.id.number.cmp(&b.id.number))
        .map(|accept| accept.value.clone())
        .unwrap_or(Value::NoOp);

    let id = Identifier::new(agent.node_id, epoch, request.slot);
    let accept = Accept::new(id, value);
    ctx.journal.accept(std::slice::from_ref(&accept))?;
    ctx.send(PaxosMessage::Accept(accept));

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
    Ok(agent)
}

/// A vote for one of the recovery accepts. Commits contiguously like a
/// leader; once nothing is outstanding, the recovery is over.
pub fn handle_accept_response(
    agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    response: AcceptResponse,
) -> Result<PaxosAgent, PaxosError> {
    let mut agent = leader::handle_accept_response(agent, ctx, response)?;
    if agent.role == Role::Recoverer && recovery_complete(&agent.data) {
        agent.role = Role::Leader;
        agent.data.timeout = ctx.random_timeout();
        info!(node = agent.node_id, "recovery complete, leading");
    }
    Ok(agent)
}

fn recovery_complete(data: &PaxosData) -> bool {
    data.prepare_responses.is_empty() && data.accept_responses.is_empty()
}

/// Role timeout: rebroadcast prepares still short of a majority and accepts
/// past their resend deadline.
pub fn check_timeout(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    for (id, votes) in &agent.data.prepare_responses {
        if !ctx.quorum.reached(agent.data.cluster_size, votes.len()) {
            ctx.send(PaxosMessage::Prepare(*id));
        }
    }
    agent = leader::resend_expired_accepts(agent, ctx)?;
    agent.data.timeout = ctx.random_timeout();
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_prepares_empty_journal() {
        // Nothing committed, nothing accepted: one prepare at slot 1 under
        // the next counter.
        let progress = Progress::default();
        let bounds = JournalBounds { min: 0, max: 0 };
        let prepares = recovery_prepares(&progress, 3, &bounds);
        assert_eq!(prepares, vec![Identifier::new(3, BallotNumber::new(1, 3), 1)]);
    }

    #[test]
    fn test_recovery_prepares_cover_accepted_tail() {
        // One accepted slot beyond the commit point: prepare it and one
        // empty slot past it.
        let progress = Progress::default();
        let bounds = JournalBounds { min: 1, max: 1 };
        let prepares = recovery_prepares(&progress, 3, &bounds);
        assert_eq!(
            prepares,
            vec![
                Identifier::new(3, BallotNumber::new(1, 3), 1),
                Identifier::new(3, BallotNumber::new(1, 3), 2),
            ]
        );
    }

    #[test]
    fn test_recovery_counter_exceeds_promise_and_commit() {
        let progress = Progress::new(
            BallotNumber::new(4, 1),
            Identifier::new(2, BallotNumber::new(6, 2), 9),
        );
        let bounds = JournalBounds { min: 1, max: 11 };
        let prepares = recovery_prepares(&progress, 0, &bounds);
        // Counter tops the committed ballot, not just the promise.
        assert!(prepares.iter().all(|p| p.number == BallotNumber::new(7, 0)));
        assert_eq!(prepares.first().map(|p| p.slot), Some(10));
        assert_eq!(prepares.last().map(|p| p.slot), Some(12));
    }
}
