//! Gap-filling retransmission.
//!
//! A lagging replica asks a peer for everything above its commit point. The
//! responder splits its answer at its own commit point: `committed` slots
//! can be delivered immediately, `uncommitted` ones may only be journaled.
//! The applier's write order — deliver, then progress, then accepts — is
//! what keeps a crash at any point recoverable.

use tracing::{debug, warn};

use crate::error::PaxosError;
use crate::journal::{JournalBounds, JournalError};

use super::ballot::SlotIndex;
use super::data::{Accept, PaxosAgent, Progress};
use super::delivery::apply_value;
use super::event::EventCtx;
use super::message::{PaxosMessage, RetransmitRequest, RetransmitResponse};

/// The two halves of a retransmission answer, both slot-ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseState {
    /// Accepts at or below the responder's commit point.
    pub committed: Vec<Accept>,
    /// Accepts above the responder's commit point.
    pub uncommitted: Vec<Accept>,
}

/// Build a retransmission answer from journal state.
///
/// `None` when the requester has fallen below the retained history — the
/// first slot it needs is older than `bounds.min` — in which case it must
/// resynchronize at a higher level than this protocol.
pub fn response_state<F>(
    bounds: JournalBounds,
    committed_slot: SlotIndex,
    mut accepted: F,
    from_slot: SlotIndex,
) -> Result<Option<ResponseState>, JournalError>
where
    F: FnMut(SlotIndex) -> Result<Option<Accept>, JournalError>,
{
    if from_slot + 1 < bounds.min {
        return Ok(None);
    }

    let mut committed = Vec::new();
    let first = (from_slot + 1).max(bounds.min);
    for slot in first..=committed_slot.min(bounds.max) {
        if let Some(accept) = accepted(slot)? {
            committed.push(accept);
        }
    }

    let mut uncommitted = Vec::new();
    for slot in (committed_slot + 1).max(bounds.min)..=bounds.max {
        if let Some(accept) = accepted(slot)? {
            uncommitted.push(accept);
        }
    }

    Ok(Some(ResponseState {
        committed,
        uncommitted,
    }))
}

/// The longest prefix of `accepts` that continues the log gaplessly from
/// `committed_slot`. A gap ends the prefix: the receiver refuses to
/// reorder a misordered sender.
pub fn contiguous_committable(committed_slot: SlotIndex, accepts: &[Accept]) -> &[Accept] {
    let mut expected = committed_slot + 1;
    let mut len = 0;
    for accept in accepts {
        if accept.id.slot != expected {
            break;
        }
        expected += 1;
        len += 1;
    }
    &accepts[..len]
}

/// Serve a retransmission request from the local journal. Any role answers.
pub fn handle_request(
    agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    request: RetransmitRequest,
) -> Result<PaxosAgent, PaxosError> {
    let bounds = ctx.journal.bounds()?;
    let committed_slot = agent.data.progress.highest_committed.slot;
    let state = response_state(
        bounds,
        committed_slot,
        |slot| ctx.journal.accepted(slot),
        request.log_index,
    )?;
    match state {
        Some(state) => {
            debug!(
                node = agent.node_id,
                to = request.from,
                committed = state.committed.len(),
                uncommitted = state.uncommitted.len(),
                "serving retransmission"
            );
            ctx.send(PaxosMessage::RetransmitResponse(RetransmitResponse {
                from: agent.node_id,
                to: request.from,
                committed: state.committed,
                uncommitted: state.uncommitted,
            }));
        }
        None => warn!(
            node = agent.node_id,
            from_slot = request.log_index,
            retained_min = bounds.min,
            "retransmit request below retained history"
        ),
    }
    Ok(agent)
}

/// Apply a retransmission answer.
///
/// 1. Deliver the contiguous committable prefix of `committed`.
/// 2. Persist the new progress: commit point at the last delivered slot,
///    promise raised to the highest ballot seen anywhere in the answer.
/// 3. Journal the accepts that survive the new promise.
///
/// Applying the same answer twice is a no-op the second time.
pub fn apply_response(
    mut agent: PaxosAgent,
    ctx: &mut EventCtx<'_>,
    response: RetransmitResponse,
) -> Result<PaxosAgent, PaxosError> {
    let committed_slot = agent.data.progress.highest_committed.slot;
    let prefix = contiguous_committable(committed_slot, &response.committed);
    if prefix.len() < response.committed.len() {
        warn!(
            node = agent.node_id,
            delivered = prefix.len(),
            received = response.committed.len(),
            "truncating misordered retransmission to its contiguous prefix"
        );
    }

    for accept in prefix {
        apply_value(ctx, accept)?;
    }

    let highest_committed = prefix
        .last()
        .map(|accept| accept.id)
        .unwrap_or(agent.data.progress.highest_committed);
    let highest_number = response
        .committed
        .iter()
        .chain(response.uncommitted.iter())
        .map(|accept| accept.id.number)
        .max();
    let highest_promised = match highest_number {
        Some(number) => agent.data.progress.highest_promised.max(number),
        None => agent.data.progress.highest_promised,
    };
    let progress = Progress::new(highest_promised, highest_committed);
    ctx.journal.save_progress(&progress)?;
    agent.data.progress = progress;

    let acceptable: Vec<Accept> = response
        .committed
        .iter()
        .chain(response.uncommitted.iter())
        .filter(|accept| accept.id.number >= highest_promised)
        .cloned()
        .collect();
    ctx.journal.accept(&acceptable)?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::ballot::{BallotNumber, Identifier};
    use crate::paxos::data::Value;

    fn accept(slot: SlotIndex) -> Accept {
        Accept::new(
            Identifier::new(1, BallotNumber::new(2, 1), slot),
            Value::NoOp,
        )
    }

    fn lookup(slot: SlotIndex) -> Result<Option<Accept>, JournalError> {
        Ok(Some(accept(slot)))
    }

    #[test]
    fn test_response_all_committed() {
        let bounds = JournalBounds { min: 98, max: 100 };
        let state = response_state(bounds, 100, lookup, 97).unwrap().unwrap();
        assert_eq!(state.committed, vec![accept(98), accept(99), accept(100)]);
        assert!(state.uncommitted.is_empty());
    }

    #[test]
    fn test_response_all_uncommitted() {
        let bounds = JournalBounds { min: 98, max: 100 };
        let state = response_state(bounds, 97, lookup, 97).unwrap().unwrap();
        assert!(state.committed.is_empty());
        assert_eq!(state.uncommitted, vec![accept(98), accept(99), accept(100)]);
    }

    #[test]
    fn test_response_below_retained_history() {
        let bounds = JournalBounds { min: 98, max: 100 };
        assert!(response_state(bounds, 100, lookup, 10).unwrap().is_none());
    }

    #[test]
    fn test_response_mixed() {
        let bounds = JournalBounds { min: 98, max: 101 };
        let state = response_state(bounds, 99, lookup, 97).unwrap().unwrap();
        assert_eq!(state.committed, vec![accept(98), accept(99)]);
        assert_eq!(state.uncommitted, vec![accept(100), accept(101)]);
    }

    #[test]
    fn test_contiguous_prefix_stops_at_gap() {
        let accepts = vec![accept(98), accept(99), accept(101), accept(100)];
        let prefix = contiguous_committable(97, &accepts);
        assert_eq!(prefix, &[accept(98), accept(99)][..]);
    }

    #[test]
    fn test_contiguous_prefix_empty_when_not_adjacent() {
        let accepts = vec![accept(99)];
        assert!(contiguous_committable(97, &accepts).is_empty());
    }
}
