//! Fatal errors.
//!
//! Everything recoverable (dropped messages, promise violations, misordered
//! retransmits) is handled inside the role handlers. What escapes the
//! dispatcher kills the replica: after a journal failure or a corrupt
//! committed range the only safe move is to restart from disk and rejoin.

use thiserror::Error;

use crate::journal::JournalError;
use crate::paxos::ballot::SlotIndex;

/// Errors that abort the dispatcher.
#[derive(Debug, Error)]
pub enum PaxosError {
    /// The journal failed; durable state can no longer be trusted to
    /// advance.
    #[error("journal failure: {0}")]
    Journal(#[from] JournalError),

    /// The journal's bounds claim a slot it cannot produce while delivering
    /// a committed range.
    #[error("missing accept for committed slot {slot}")]
    MissingAccept {
        /// The slot the journal failed to produce.
        slot: SlotIndex,
    },

    /// A membership change reached delivery. Reconfiguration is not yet
    /// implemented.
    #[error("membership change delivery is not implemented")]
    MembershipChangeUnimplemented,

    /// The engine already died on a fatal error and refuses further events.
    #[error("engine halted by a previous fatal error")]
    Halted,
}
