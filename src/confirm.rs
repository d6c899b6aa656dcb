//! Post-acceptance confirmation polling
//!
//! Submission acceptance and execution confirmation are separate
//! guarantees. The poll here is best-effort and runs once after a
//! successful broadcast; whatever it learns only annotates the audit
//! record. It never downgrades a success -- conflating the two would make
//! the engine retry an already-delivered submission.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::classify::{classify_reply, LedgerOp, ReplyKind};
use crate::ledger::{LedgerClient, TxStatusReply};
use crate::registry::Endpoint;

/// Outcome of the inclusion poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Included in a block and executed
    Confirmed,
    /// Known to the ledger but not yet included
    Pending,
    /// Not found (possibly indexing lag)
    NotFound,
    /// The poll itself failed; inclusion state unknown
    Unknown,
}

impl std::fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::NotFound => "not_found",
            ConfirmationStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Poll the ledger once for the inclusion status of a transaction
///
/// Tries the endpoint that accepted the submission first, then at most
/// one alternate. Any failure to learn the status yields `Unknown`.
#[instrument(skip(client, primary, fallback), fields(tx_hash = %tx_hash))]
pub async fn verify_inclusion(
    client: &dyn LedgerClient,
    primary: &Endpoint,
    fallback: Option<&Endpoint>,
    tx_hash: &str,
) -> ConfirmationStatus {
    match poll_endpoint(client, primary, tx_hash).await {
        Some(status) => status,
        None => match fallback {
            Some(alternate) => poll_endpoint(client, alternate, tx_hash)
                .await
                .unwrap_or(ConfirmationStatus::Unknown),
            None => ConfirmationStatus::Unknown,
        },
    }
}

async fn poll_endpoint(
    client: &dyn LedgerClient,
    endpoint: &Endpoint,
    tx_hash: &str,
) -> Option<ConfirmationStatus> {
    let raw = match client.tx_status(endpoint, tx_hash).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(endpoint = %endpoint.label, error = %e, "Confirmation poll failed");
            return None;
        }
    };

    if classify_reply(LedgerOp::Query, &raw) != ReplyKind::Success {
        warn!(endpoint = %endpoint.label, "Confirmation poll returned malformed reply");
        return None;
    }

    let reply: TxStatusReply = match serde_json::from_str(&raw) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(endpoint = %endpoint.label, error = %e, "Confirmation reply shape mismatch");
            return None;
        }
    };

    let status = if !reply.found {
        ConfirmationStatus::NotFound
    } else if reply.height == 0 {
        ConfirmationStatus::Pending
    } else {
        ConfirmationStatus::Confirmed
    };
    debug!(endpoint = %endpoint.label, status = %status, "Confirmation poll completed");
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::wallet::SignedPayload;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StatusScript(Mutex<VecDeque<Result<String, TransportError>>>);

    impl StatusScript {
        fn new(replies: Vec<Result<String, TransportError>>) -> Self {
            Self(Mutex::new(replies.into()))
        }
    }

    #[async_trait]
    impl LedgerClient for StatusScript {
        async fn unfulfilled_work(
            &self,
            _endpoint: &Endpoint,
            _topic_id: u64,
        ) -> Result<String, TransportError> {
            unreachable!("confirmation tests only poll tx status")
        }
        async fn account_sequence(
            &self,
            _endpoint: &Endpoint,
            _account: &str,
        ) -> Result<String, TransportError> {
            unreachable!("confirmation tests only poll tx status")
        }
        async fn broadcast(
            &self,
            _endpoint: &Endpoint,
            _payload: &SignedPayload,
        ) -> Result<String, TransportError> {
            unreachable!("confirmation tests only poll tx status")
        }
        async fn tx_status(
            &self,
            _endpoint: &Endpoint,
            _tx_hash: &str,
        ) -> Result<String, TransportError> {
            self.0.lock().unwrap().pop_front().expect("scripted reply")
        }
    }

    fn ep(label: &str) -> Endpoint {
        Endpoint::new(format!("http://{label}.example"), label, 1)
    }

    fn unreachable_err() -> TransportError {
        TransportError::Connection {
            endpoint: "any".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_confirmed_when_included() {
        let client = StatusScript::new(vec![Ok(
            r#"{"found":true,"height":123456,"code":0}"#.to_string()
        )]);
        let status = verify_inclusion(&client, &ep("a"), None, "ABC").await;
        assert_eq!(status, ConfirmationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_pending_when_not_yet_included() {
        let client = StatusScript::new(vec![Ok(r#"{"found":true,"height":0}"#.to_string())]);
        let status = verify_inclusion(&client, &ep("a"), None, "ABC").await;
        assert_eq!(status, ConfirmationStatus::Pending);
    }

    #[tokio::test]
    async fn test_not_found() {
        let client = StatusScript::new(vec![Ok(r#"{"found":false}"#.to_string())]);
        let status = verify_inclusion(&client, &ep("a"), None, "ABC").await;
        assert_eq!(status, ConfirmationStatus::NotFound);
    }

    #[tokio::test]
    async fn test_fallback_endpoint_used_after_primary_failure() {
        let client = StatusScript::new(vec![
            Err(unreachable_err()),
            Ok(r#"{"found":true,"height":99}"#.to_string()),
        ]);
        let fallback = ep("b");
        let status = verify_inclusion(&client, &ep("a"), Some(&fallback), "ABC").await;
        assert_eq!(status, ConfirmationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_unknown_when_no_endpoint_reachable() {
        let client = StatusScript::new(vec![Err(unreachable_err()), Err(unreachable_err())]);
        let fallback = ep("b");
        let status = verify_inclusion(&client, &ep("a"), Some(&fallback), "ABC").await;
        assert_eq!(status, ConfirmationStatus::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_on_malformed_status_reply() {
        let client = StatusScript::new(vec![Ok("<html>504</html>".to_string())]);
        let status = verify_inclusion(&client, &ep("a"), None, "ABC").await;
        assert_eq!(status, ConfirmationStatus::Unknown);
    }
}
