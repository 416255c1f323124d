//! In-memory journal for tests and embedders that supply their own
//! durability (for example a host that commits consensus state inside its
//! own transaction).

use std::collections::BTreeMap;

use crate::paxos::ballot::SlotIndex;
use crate::paxos::data::{Accept, Progress};

use super::{Journal, JournalBounds, JournalError};

/// Journal backed by a map. "Durable" only for the life of the process.
#[derive(Clone, Debug, Default)]
pub struct MemJournal {
    progress: Progress,
    accepts: BTreeMap<SlotIndex, Accept>,
}

impl MemJournal {
    /// Empty journal with default progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal seeded with an existing progress record.
    pub fn with_progress(progress: Progress) -> Self {
        MemJournal {
            progress,
            accepts: BTreeMap::new(),
        }
    }

    /// Number of stored accepts.
    pub fn len(&self) -> usize {
        self.accepts.len()
    }

    /// True when no accepts are stored.
    pub fn is_empty(&self) -> bool {
        self.accepts.is_empty()
    }
}

impl Journal for MemJournal {
    fn load_progress(&mut self) -> Result<Progress, JournalError> {
        Ok(self.progress)
    }

    fn save_progress(&mut self, progress: &Progress) -> Result<(), JournalError> {
        self.progress = *progress;
        Ok(())
    }

    fn accept(&mut self, accepts: &[Accept]) -> Result<(), JournalError> {
        for accept in accepts {
            self.accepts.insert(accept.id.slot, accept.clone());
        }
        Ok(())
    }

    fn accepted(&self, slot: SlotIndex) -> Result<Option<Accept>, JournalError> {
        Ok(self.accepts.get(&slot).cloned())
    }

    fn bounds(&self) -> Result<JournalBounds, JournalError> {
        let min = self.accepts.keys().next().copied().unwrap_or(0);
        let max = self.accepts.keys().next_back().copied().unwrap_or(0);
        Ok(JournalBounds { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::ballot::{BallotNumber, Identifier};
    use crate::paxos::data::Value;

    fn accept(slot: SlotIndex, counter: i32) -> Accept {
        Accept::new(
            Identifier::new(1, BallotNumber::new(counter, 1), slot),
            Value::NoOp,
        )
    }

    #[test]
    fn test_empty_bounds_are_zero() {
        let journal = MemJournal::new();
        assert_eq!(journal.bounds().unwrap(), JournalBounds { min: 0, max: 0 });
    }

    #[test]
    fn test_accept_and_bounds() {
        let mut journal = MemJournal::new();
        journal.accept(&[accept(3, 1), accept(4, 1)]).unwrap();
        assert_eq!(journal.bounds().unwrap(), JournalBounds { min: 3, max: 4 });
        assert_eq!(journal.accepted(3).unwrap().unwrap().id.slot, 3);
        assert!(journal.accepted(5).unwrap().is_none());
    }

    #[test]
    fn test_higher_ballot_supersedes_slot() {
        let mut journal = MemJournal::new();
        journal.accept(&[accept(3, 1)]).unwrap();
        journal.accept(&[accept(3, 2)]).unwrap();
        let stored = journal.accepted(3).unwrap().unwrap();
        assert_eq!(stored.id.number.counter, 2);
    }
}
