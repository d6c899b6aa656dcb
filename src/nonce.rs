//! Work-slot discovery and account-sequence resolution
//!
//! The client only observes ledger state here: work slots are discovered
//! and consumed on the ledger side, never created or deleted locally, and
//! the account sequence is re-fetched immediately before every submission
//! attempt. A cached sequence is the single most common cause of rejected
//! submissions when attempts happen in quick succession, so there is
//! deliberately no cache and no speculative increment.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::classify::{classify_reply, LedgerOp, ReplyKind};
use crate::errors::AttemptError;
use crate::ledger::{LedgerClient, SequenceReply, WorkSlotsReply};
use crate::registry::Endpoint;

/// A ledger-issued claimable unit of work for one topic
///
/// Fulfillable at most once; the fulfilled flag is ledger state observed
/// at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSlot {
    pub topic_id: u64,
    pub block_height: u64,
    #[serde(default)]
    pub fulfilled: bool,
}

/// Ledger-owned per-account ordering counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSequence(pub u64);

/// Query the endpoint for claimable work on a topic
///
/// `Ok(None)` means no unfulfilled slot exists right now. That is an
/// expected, frequent outcome -- not an error -- and callers log it at
/// informational severity.
#[instrument(skip(client, endpoint), fields(endpoint = %endpoint.label))]
pub async fn find_claimable_work(
    client: &dyn LedgerClient,
    endpoint: &Endpoint,
    topic_id: u64,
) -> Result<Option<WorkSlot>, AttemptError> {
    let raw = client
        .unfulfilled_work(endpoint, topic_id)
        .await
        .map_err(AttemptError::from_transport)?;

    if classify_reply(LedgerOp::Query, &raw) != ReplyKind::Success {
        return Err(AttemptError::new(
            ReplyKind::MalformedResponse,
            &endpoint.label,
            format!("unparseable work reply: {}", snippet(&raw)),
        ));
    }

    let reply: WorkSlotsReply = serde_json::from_str(&raw).map_err(|e| {
        AttemptError::new(
            ReplyKind::MalformedResponse,
            &endpoint.label,
            format!("work reply shape mismatch: {e}"),
        )
    })?;

    let slot = reply.nonces.into_iter().find(|n| !n.fulfilled);
    match &slot {
        Some(s) => debug!(topic_id, block_height = s.block_height, "Found claimable work slot"),
        None => debug!(topic_id, "No unfulfilled work slot"),
    }
    Ok(slot)
}

/// Fetch the current signing sequence for an account
///
/// Always called on the same endpoint the following submission will use.
#[instrument(skip(client, endpoint), fields(endpoint = %endpoint.label))]
pub async fn fetch_sequence(
    client: &dyn LedgerClient,
    endpoint: &Endpoint,
    account: &str,
) -> Result<AccountSequence, AttemptError> {
    let raw = client
        .account_sequence(endpoint, account)
        .await
        .map_err(AttemptError::from_transport)?;

    if classify_reply(LedgerOp::Query, &raw) != ReplyKind::Success {
        return Err(AttemptError::new(
            ReplyKind::MalformedResponse,
            &endpoint.label,
            format!("unparseable sequence reply: {}", snippet(&raw)),
        ));
    }

    let reply: SequenceReply = serde_json::from_str(&raw).map_err(|e| {
        AttemptError::new(
            ReplyKind::MalformedResponse,
            &endpoint.label,
            format!("sequence reply shape mismatch: {e}"),
        )
    })?;

    debug!(account = %reply.account, sequence = reply.sequence, "Fetched account sequence");
    Ok(AccountSequence(reply.sequence))
}

fn snippet(raw: &str) -> String {
    let mut s: String = raw.chars().take(120).collect();
    if raw.len() > s.len() {
        s.push_str("...");
    }
    s
}
