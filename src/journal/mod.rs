//! Durable storage contract for the consensus core.
//!
//! The journal holds the two things a replica must not forget: its
//! [`Progress`](crate::paxos::data::Progress) record and the accepts it has
//! voted for. The core calls it synchronously from inside event handlers;
//! every write must be durable before the call returns, because messages
//! emitted by the event hit the wire afterwards.
//!
//! Crash contract: for the sequence of journal writes and deliveries issued
//! by one event, the state visible after a crash must be a prefix of that
//! sequence. A later write must never survive a crash that an earlier one
//! did not.

use thiserror::Error;

use crate::paxos::ballot::SlotIndex;
use crate::paxos::data::{Accept, Progress};

pub mod file;
pub mod memory;

pub use file::FileJournal;
pub use memory::MemJournal;

/// Inclusive range of slots for which [`Journal::accepted`] may return
/// `Some`. Both bounds are `0` when nothing has been accepted, so
/// `max + 1` is always the first slot with no durable accept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JournalBounds {
    /// Lowest retained slot.
    pub min: SlotIndex,
    /// Highest retained slot.
    pub max: SlotIndex,
}

/// Journal failures. All of them are fatal for the replica: consensus must
/// not advance past a write it cannot trust.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Underlying storage I/O failed.
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    /// The progress record failed its magic, version or checksum test.
    #[error("corrupt progress record")]
    CorruptProgress,

    /// Encoding or decoding a record failed.
    #[error("journal codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Durable progress and accepted-slot store.
pub trait Journal {
    /// Load the progress record. Called once at boot.
    fn load_progress(&mut self) -> Result<Progress, JournalError>;

    /// Durably replace the progress record. Crash-atomic; durable before
    /// return.
    fn save_progress(&mut self, progress: &Progress) -> Result<(), JournalError>;

    /// Durably record accepts, one per slot. A slot re-accepted under a
    /// higher ballot supersedes the stored accept. Crash-atomic as a batch
    /// prefix; durable before return.
    fn accept(&mut self, accepts: &[Accept]) -> Result<(), JournalError>;

    /// The accept durably stored for `slot`, if any.
    fn accepted(&self, slot: SlotIndex) -> Result<Option<Accept>, JournalError>;

    /// The slot range this journal can answer [`Journal::accepted`] for.
    fn bounds(&self) -> Result<JournalBounds, JournalError>;
}
