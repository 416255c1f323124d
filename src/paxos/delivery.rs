//! Delivery of committed values into the host application.
//!
//! The order per slot is fixed and safety-critical:
//!
//! 1. load the accept, 2. apply the value to the application, 3. persist
//! the advanced progress, 4. reply to the owning client, if any.
//!
//! Progress is saved only after the application has applied the value. A
//! crash between apply and save re-delivers the slot on recovery, which the
//! application absorbs through the `delivery_id` dedupe key. The reverse
//! order could silently forget a committed value.

use tracing::debug;

use crate::error::PaxosError;
use crate::host::{ClientReply, Payload};

use super::ballot::Identifier;
use super::data::{Accept, PaxosAgent, Value};
use super::event::EventCtx;

/// Apply one value to the application, without touching progress.
///
/// Returns the application's result bytes for client commands, `None` for
/// a no-op. Membership changes cannot be delivered yet and kill the
/// replica.
pub fn apply_value(ctx: &mut EventCtx<'_>, accept: &Accept) -> Result<Option<Vec<u8>>, PaxosError> {
    match &accept.value {
        Value::NoOp => Ok(None),
        Value::ClientCommand { bytes, .. } => {
            let output = ctx.app.deliver_client(Payload {
                delivery_id: accept.id.slot,
                bytes: bytes.clone(),
            });
            Ok(Some(output))
        }
        Value::MembershipChange(_) => Err(PaxosError::MembershipChangeUnimplemented),
    }
}

/// Deliver one committed slot: apply, persist progress, answer the client.
pub fn deliver_one(
    agent: &mut PaxosAgent,
    ctx: &mut EventCtx<'_>,
    accept: &Accept,
) -> Result<(), PaxosError> {
    let output = apply_value(ctx, accept)?;
    let progress = agent.data.progress.commit(accept.id);
    ctx.journal.save_progress(&progress)?;
    agent.data.progress = progress;

    if let Some((value, reply_to)) = agent.data.client_commands.remove(&accept.id) {
        ctx.reply(
            reply_to,
            ClientReply::Response {
                msg_id: value.client_msg_id().unwrap_or(0),
                bytes: output.unwrap_or_default(),
            },
        );
    }
    debug!(
        node = agent.node_id,
        slot = accept.id.slot,
        "delivered committed slot"
    );
    Ok(())
}

/// Deliver every contiguous journaled slot up to `target`.
///
/// Only accepts carrying the committing leader's ballot are trusted: a
/// journaled accept under a lower ballot may never have been chosen, so it
/// stops the loop the same way a gap does. Returns whether the target was
/// reached; the caller retransmit-requests when it was not.
pub fn commit_up_to(
    agent: &mut PaxosAgent,
    ctx: &mut EventCtx<'_>,
    target: &Identifier,
) -> Result<bool, PaxosError> {
    loop {
        let slot = agent.data.progress.highest_committed.slot + 1;
        if slot > target.slot {
            break;
        }
        let accept = match ctx.journal.accepted(slot)? {
            Some(accept) => accept,
            None => break,
        };
        if accept.id.number != target.number {
            break;
        }
        deliver_one(agent, ctx, &accept)?;
    }
    Ok(agent.data.progress.highest_committed.slot >= target.slot)
}
