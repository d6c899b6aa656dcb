//! Reply classification for ledger responses
//!
//! Every raw reply is mapped onto a closed set of categories before the
//! engine decides what to do with it. Classification is purely a function
//! of the reply content and the operation attempted, never of which
//! endpoint produced it -- endpoints are interchangeable, and uniform
//! classification is what makes retry-with-rotation safe.

use serde::Deserialize;

use crate::ledger::BroadcastReply;

/// Cosmos-SDK error code for a stale account sequence
pub const SEQUENCE_MISMATCH_CODE: u32 = 32;

/// Logical operation whose reply is being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    /// Read-only query (work slots, sequence, tx status)
    Query,
    /// Transaction broadcast
    Submit,
}

/// Closed set of reply categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Reply is well-formed and the operation was accepted
    Success,

    /// Reply is not valid structured data (e.g. an HTML error page
    /// returned by a misbehaving gateway)
    MalformedResponse,

    /// The call did not complete within its deadline
    Timeout,

    /// Ledger reports a different expected account sequence than submitted
    SequenceMismatch,

    /// The work slot was claimed by the time the submission landed
    AlreadyFulfilled,

    /// Syntactically valid submission declined for a domain reason
    Rejected,

    /// Connection-level failure
    TransportError,
}

impl ReplyKind {
    /// Whether another attempt within the cycle may help
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplyKind::Timeout => true,
            ReplyKind::TransportError => true,
            ReplyKind::MalformedResponse => true,
            // Ledger-state errors: retryable via state re-fetch
            ReplyKind::SequenceMismatch => true,
            ReplyKind::AlreadyFulfilled => true,

            ReplyKind::Success => false,
            ReplyKind::Rejected => false,
        }
    }

    /// Whether the next attempt should move to a different endpoint
    ///
    /// Sequence and fulfillment state must be re-read from the endpoint
    /// whose view produced the mismatch, so those kinds pin the endpoint.
    pub fn rotates_endpoint(&self) -> bool {
        matches!(
            self,
            ReplyKind::Timeout | ReplyKind::TransportError | ReplyKind::MalformedResponse
        )
    }

    /// Whether this failure counts against the endpoint's health
    ///
    /// Ledger-state errors are not the endpoint's fault and never
    /// penalize it.
    pub fn penalizes_endpoint(&self) -> bool {
        matches!(
            self,
            ReplyKind::Timeout | ReplyKind::TransportError | ReplyKind::MalformedResponse
        )
    }

    /// Stable lowercase name for logs and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyKind::Success => "success",
            ReplyKind::MalformedResponse => "malformed_response",
            ReplyKind::Timeout => "timeout",
            ReplyKind::SequenceMismatch => "sequence_mismatch",
            ReplyKind::AlreadyFulfilled => "already_fulfilled",
            ReplyKind::Rejected => "rejected",
            ReplyKind::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the raw text of a ledger reply
///
/// The leading shape check is a narrow defense against misbehaving
/// gateways that answer with an HTML error page instead of JSON; it runs
/// before any parsing is attempted.
pub fn classify_reply(op: LedgerOp, raw: &str) -> ReplyKind {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        return ReplyKind::MalformedResponse;
    }

    match op {
        LedgerOp::Query => {
            // Queries are parsed into typed replies by their callers; here
            // only well-formedness is judged.
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(_) => ReplyKind::Success,
                Err(_) => ReplyKind::MalformedResponse,
            }
        }
        LedgerOp::Submit => match serde_json::from_str::<BroadcastReply>(trimmed) {
            Ok(reply) => classify_broadcast(&reply),
            Err(_) => ReplyKind::MalformedResponse,
        },
    }
}

fn classify_broadcast(reply: &BroadcastReply) -> ReplyKind {
    if reply.code == 0 {
        return ReplyKind::Success;
    }

    let log = reply.raw_log.to_lowercase();
    if reply.code == SEQUENCE_MISMATCH_CODE || log.contains("account sequence mismatch") {
        ReplyKind::SequenceMismatch
    } else if log.contains("already fulfilled") || log.contains("nonce already") {
        ReplyKind::AlreadyFulfilled
    } else {
        ReplyKind::Rejected
    }
}

/// Extract a short, log-friendly detail string from a submit reply
pub fn submit_error_detail(raw: &str) -> String {
    #[derive(Deserialize)]
    struct LogOnly {
        #[serde(default)]
        code: u32,
        #[serde(default)]
        raw_log: String,
    }

    match serde_json::from_str::<LogOnly>(raw.trim_start()) {
        Ok(parsed) if !parsed.raw_log.is_empty() => {
            format!("code {}: {}", parsed.code, parsed.raw_log)
        }
        _ => {
            let mut snippet: String = raw.chars().take(160).collect();
            if raw.len() > snippet.len() {
                snippet.push_str("...");
            }
            snippet
        }
    }
}
