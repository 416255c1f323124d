//! Follower behaviour: acceptor duties, the low-prepare liveness probe and
//! the heartbeat-evidence failover decision.
//!
//! A follower that stops hearing heartbeats does not immediately duel for
//! leadership. It first broadcasts a *low prepare* — a prepare carrying the
//! reserved minimum ballot that no acceptor can grant — and reads the nacks:
//! each one carries the responder's progress and the highest leader
//! heartbeat it has observed. Only when a majority's evidence shows no
//! leader this node cannot see does it fail over.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::PaxosError;

use super::ballot::Identifier;
use super::data::PaxosAgent;
use super::delivery::commit_up_to;
use super::event::{backdown, EventCtx};
use super::message::{
    AcceptAck, AcceptNack, AcceptResponse, Commit, Heartbeat, PaxosMessage, PrepareAck,
    PrepareNack, PrepareResponse, RetransmitRequest,
};

/// Outcome of the failover evaluation over a majority of probe responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailoverDecision {
    /// Whether to fail over and start recovery.
    pub failover: bool,
    /// Highest heartbeat counter across own and reported evidence.
    pub max_heartbeat: u64,
}

/// Decide failover from probe-nack heartbeat evidence.
///
/// `evidence` is the heartbeat counter carried by each nack. Counters no
/// newer than our own tell us nothing. If newer counters exist, a leader is
/// alive somewhere; failover is suppressed only when the nodes that see it,
/// plus the unreachable leader itself, form a majority — otherwise the
/// cluster risks a stall and a duel is the lesser evil.
pub fn compute_failover(
    leader_heartbeat: u64,
    cluster_size: u32,
    evidence: &[u64],
) -> FailoverDecision {
    let larger: Vec<u64> = evidence
        .iter()
        .copied()
        .filter(|&h| h > leader_heartbeat)
        .collect();
    let max_heartbeat = larger
        .iter()
        .copied()
        .max()
        .unwrap_or(leader_heartbeat)
        .max(leader_heartbeat);
    let failover = if larger.is_empty() {
        true
    } else {
        (larger.len() + 1) as u32 <= cluster_size / 2
    };
    FailoverDecision {
        failover,
        max_heartbeat,
    }
}

/// Role timeout: launch or refresh the low-prepare probe.
///
/// The probe is never journaled — the low ballot is not a promise, it only
/// solicits evidence.
pub fn check_timeout(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
) -> Result<PaxosAgent, PaxosError> {
    if ctx.now < agent.data.timeout {
        return Ok(agent);
    }

    if let Some(outstanding) = agent.data.prepare_responses.keys().next().copied() {
        debug!(node = agent.node_id, "rebroadcasting low-prepare probe");
        ctx.send(PaxosMessage::Prepare(outstanding));
    } else {
        let probe = Identifier::low_prepare(agent.node_id);
        let bounds = ctx.journal.bounds()?;
        let self_nack = PrepareResponse::Nack(PrepareNack {
            request: probe,
            from: agent.node_id,
            progress: agent.data.progress,
            highest_accepted: bounds.max,
            leader_heartbeat: agent.data.leader_heartbeat,
        });
        let mut votes = BTreeMap::new();
        votes.insert(agent.node_id, self_nack);
        agent.data.prepare_responses.insert(probe, votes);
        info!(node = agent.node_id, "timed out, probing for a live leader");
        ctx.send(PaxosMessage::Prepare(probe));
    }
    agent.data.timeout = ctx.random_timeout();
    Ok(agent)
}

/// A response to the outstanding low-prepare probe.
pub fn handle_prepare_response(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    response: PrepareResponse,
) -> Result<PaxosAgent, PaxosError> {
    let request = *response.request();
    if !agent.data.prepare_responses.contains_key(&request) {
        debug!(node = agent.node_id, "stale prepare response, discarding");
        return Ok(agent);
    }

    // A responder that has committed further than us makes probing moot:
    // catch up first, then reconsider.
    if response.progress().highest_committed.slot > agent.data.progress.highest_committed.slot {
        let responder = response.from();
        let behind_from = agent.data.progress.highest_committed.slot;
        info!(
            node = agent.node_id,
            responder, "responder is ahead, requesting retransmission"
        );
        let agent = backdown(agent, ctx);
        ctx.send(PaxosMessage::RetransmitRequest(RetransmitRequest {
            from: agent.node_id,
            to: responder,
            log_index: behind_from,
        }));
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

    let evidence: Vec<u64> = agent
        .data
        .prepare_responses
        .get(&request)
        .into_iter()
        .flat_map(|votes| votes.values())
        .filter_map(|vote| match vote {
            PrepareResponse::Nack(nack) => Some(nack.leader_heartbeat),
            PrepareResponse::Ack(_) => None,
        })
        .collect();
    let decision = compute_failover(agent.data.leader_heartbeat, cluster_size, &evidence);

    if decision.failover {
        info!(
            node = agent.node_id,
            "no live leader in evidence, failing over"
        );
        super::recoverer::promote(agent, ctx)
    } else {
        warn!(
            node = agent.node_id,
            max_heartbeat = decision.max_heartbeat,
            "failover suppressed, a leader is alive behind a partition"
        );
        agent.data.prepare_responses.clear();
        agent.data.leader_heartbeat = decision.max_heartbeat;
        agent.data.timeout = ctx.random_timeout();
        Ok(agent)
    }
}

/// Heartbeat from a leader: newer counters reset the role timeout.
pub fn handle_heartbeat(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    heartbeat: Heartbeat,
) -> Result<PaxosAgent, PaxosError> {
    if heartbeat.counter > agent.data.leader_heartbeat {
        agent.data.leader_heartbeat = heartbeat.counter;
        agent.data.timeout = ctx.random_timeout();
    }
    Ok(agent)
}

/// Commit notification: deliver what the journal has, request the rest.
pub fn handle_commit(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    from: super::ballot::NodeId,
    commit: Commit,
) -> Result<PaxosAgent, PaxosError> {
    if commit.id.slot <= agent.data.progress.highest_committed.slot {
        return Ok(agent);
    }
    let reached = commit_up_to(&mut agent, ctx, &commit.id)?;
    if !reached {
        debug!(
            node = agent.node_id,
            target = commit.id.slot,
            committed = agent.data.progress.highest_committed.slot,
            "commit ahead of journal, requesting retransmission"
        );
        ctx.send(PaxosMessage::RetransmitRequest(RetransmitRequest {
            from: agent.node_id,
            to: from,
            log_index: agent.data.progress.highest_committed.slot,
        }));
    }
    Ok(agent)
}

/// Acceptor phase 1: promise to ballots above our own, refuse the rest.
///
/// An equal ballot is an idempotent re-promise — granted again without a
/// journal write, so a proposer's rebroadcast is harmless. The low prepare
/// always lands below any real promise and is always nacked.
pub fn handle_prepare(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    id: Identifier,
) -> Result<PaxosAgent, PaxosError> {
    let bounds = ctx.journal.bounds()?;
    let promised = agent.data.progress.highest_promised;

    if id.number > promised {
        let progress = agent.data.progress.promise(id.number);
        ctx.journal.save_progress(&progress)?;
        agent.data.progress = progress;
    }
    if id.number >= promised {
        let accepted_for_slot = ctx.journal.accepted(id.slot)?;
        ctx.send(PaxosMessage::PrepareResponse(PrepareResponse::Ack(
            PrepareAck {
                request: id,
                from: agent.node_id,
                progress: agent.data.progress,
                highest_accepted: bounds.max,
                leader_heartbeat: agent.data.leader_heartbeat,
                accepted_for_slot,
            },
        )));
    } else {
        ctx.send(PaxosMessage::PrepareResponse(PrepareResponse::Nack(
            PrepareNack {
                request: id,
                from: agent.node_id,
                progress: agent.data.progress,
                highest_accepted: bounds.max,
                leader_heartbeat: agent.data.leader_heartbeat,
            },
        )));
    }
    Ok(agent)
}

/// Acceptor phase 2: journal values proposed at or above our promise.
///
/// A proposal above the promise raises it, and the raised progress is
/// durable before the ack can reach the wire.
pub fn handle_accept(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    accept: super::data::Accept,
) -> Result<PaxosAgent, PaxosError> {
    let promised = agent.data.progress.highest_promised;
    if accept.id.number >= promised {
        ctx.journal.accept(std::slice::from_ref(&accept))?;
        if accept.id.number > promised {
            let progress = agent.data.progress.promise(accept.id.number);
            ctx.journal.save_progress(&progress)?;
            agent.data.progress = progress;
        }
        ctx.send(PaxosMessage::AcceptResponse(AcceptResponse::Ack(
            AcceptAck {
                request: accept.id,
                from: agent.node_id,
                progress: agent.data.progress,
            },
        )));
    } else {
        ctx.send(PaxosMessage::AcceptResponse(AcceptResponse::Nack(
            AcceptNack {
                request: accept.id,
                from: agent.node_id,
                progress: agent.data.progress,
            },
        )));
    }
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_failover_when_no_newer_heartbeats() {
        // Both nacks carry evidence no newer than our own counter.
        let decision = compute_failover(1000, 3, &[999, 999]);
        assert_eq!(
            decision,
            FailoverDecision {
                failover: true,
                max_heartbeat: 1000
            }
        );
    }

    #[test]
    fn test_failover_suppressed_by_majority_evidence() {
        // Two responders see a leader we cannot; with the leader itself
        // that is a majority of three.
        let decision = compute_failover(997, 3, &[998, 999]);
        assert_eq!(
            decision,
            FailoverDecision {
                failover: false,
                max_heartbeat: 999
            }
        );
    }

    #[test]
    fn test_failover_minority_evidence_still_fails_over() {
        // In a five node cluster, one responder seeing a newer heartbeat
        // plus the leader is only two of five.
        let decision = compute_failover(10, 5, &[11]);
        assert_eq!(
            decision,
            FailoverDecision {
                failover: true,
                max_heartbeat: 11
            }
        );
    }

    #[test]
    fn test_failover_decision_matches_rule_for_random_vote_sets() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let cluster_size = rng.gen_range(1u32..=9);
            let own: u64 = rng.gen_range(0..50);
            let evidence: Vec<u64> = (0..rng.gen_range(0..8))
                .map(|_| rng.gen_range(0..100))
                .collect();
            let decision = compute_failover(own, cluster_size, &evidence);

            let larger: Vec<u64> = evidence.iter().copied().filter(|&h| h > own).collect();
            let expected_failover =
                larger.is_empty() || (larger.len() + 1) as u32 <= cluster_size / 2;
            let expected_max = larger.iter().copied().max().unwrap_or(own).max(own);
            assert_eq!(decision.failover, expected_failover);
            assert_eq!(decision.max_heartbeat, expected_max);
        }
    }
}
