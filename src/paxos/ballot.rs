//! Identifiers and orderings for the consensus core.
//!
//! Two orderings coexist: ballot order (who wins a promise duel) and slot
//! order (where a value sits in the log). `Identifier` keys sorted
//! containers in slot order only; ballot comparisons always go through
//! `.number` explicitly.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Unique, stable identifier of a cluster member.
///
/// Must survive restarts: it is the tie-breaker in ballot ordering, so a
/// node that changes its id can violate safety.
pub type NodeId = u32;

/// Position in the replicated log.
pub type SlotIndex = i64;

/// Logical clock tick, milliseconds with a host-defined origin.
pub type Tick = u64;

/// A Paxos ballot number: (counter, node).
///
/// Ordered lexicographically — a higher counter wins, and an equal counter
/// is tie-broken by the higher node id. The minimum counter value is
/// reserved for [`BallotNumber::LOW`] and is never promised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BallotNumber {
    /// Election round counter.
    pub counter: i32,
    /// Proposing node, breaks counter ties.
    pub node: NodeId,
}

impl BallotNumber {
    /// The reserved minimum ballot, used only by the low-prepare probe.
    pub const LOW: BallotNumber = BallotNumber {
        counter: i32::MIN,
        node: 0,
    };

    /// Create a ballot number.
    pub fn new(counter: i32, node: NodeId) -> Self {
        BallotNumber { counter, node }
    }

    /// True for the reserved probe ballot.
    pub fn is_low(&self) -> bool {
        *self == Self::LOW
    }
}

/// Addresses a single Paxos instance: who proposed, under which ballot,
/// for which log slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// Node that originated the proposal.
    pub from: NodeId,
    /// Ballot the proposal runs under.
    pub number: BallotNumber,
    /// Log slot the proposal targets.
    pub slot: SlotIndex,
}

impl Identifier {
    /// Create an identifier.
    pub fn new(from: NodeId, number: BallotNumber, slot: SlotIndex) -> Self {
        Identifier { from, number, slot }
    }

    /// The identifier broadcast by the low-prepare probe.
    ///
    /// Minimum ballot and minimum slot: it can never win a promise and is
    /// never journaled, it only solicits evidence about a live leader.
    pub fn low_prepare(from: NodeId) -> Self {
        Identifier {
            from,
            number: BallotNumber::LOW,
            slot: SlotIndex::MIN,
        }
    }
}

/// Slot-major ordering. Sorted containers keyed by `Identifier` iterate in
/// log order; ballot order is never implied by container position.
impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.slot
            .cmp(&other.slot)
            .then(self.number.cmp(&other.number))
            .then(self.from.cmp(&other.from))
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballot_counter_dominates() {
        let low = BallotNumber::new(1, 9);
        let high = BallotNumber::new(2, 0);
        assert!(high > low);
    }

    #[test]
    fn test_ballot_node_breaks_ties() {
        let a = BallotNumber::new(3, 1);
        let b = BallotNumber::new(3, 2);
        assert!(b > a);
    }

    #[test]
    fn test_low_ballot_is_minimal() {
        assert!(BallotNumber::LOW < BallotNumber::new(0, 0));
        assert!(BallotNumber::LOW < BallotNumber::new(i32::MIN, 1));
        assert!(BallotNumber::LOW.is_low());
    }

    #[test]
    fn test_identifier_orders_by_slot_first() {
        let early = Identifier::new(5, BallotNumber::new(9, 5), 10);
        let late = Identifier::new(1, BallotNumber::new(1, 1), 11);
        // Higher ballot does not outrank a later slot.
        assert!(early < late);
    }

    #[test]
    fn test_low_prepare_identifier_is_minimal() {
        let probe = Identifier::low_prepare(2);
        let real = Identifier::new(0, BallotNumber::new(0, 0), 0);
        assert!(probe < real);
        assert!(probe.number.is_low());
    }
}
