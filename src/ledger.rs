//! Ledger client: the four remote operations and their HTTP transport
//!
//! The [`LedgerClient`] trait is the seam between the engine and the
//! network; everything above it is testable against a scripted mock.
//! Methods return the raw reply body so classification stays a pure
//! function of content, independent of transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::TransportError;
use crate::metrics::metrics;
use crate::nonce::WorkSlot;
use crate::registry::Endpoint;
use crate::wallet::SignedPayload;

/// Reply to an unfulfilled-work query
#[derive(Debug, Clone, Deserialize)]
pub struct WorkSlotsReply {
    #[serde(default)]
    pub nonces: Vec<WorkSlot>,
}

/// Reply to an account-sequence query
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceReply {
    pub account: String,
    pub sequence: u64,
}

/// Reply to a transaction broadcast
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastReply {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub raw_log: String,
}

/// Reply to a transaction-status query
#[derive(Debug, Clone, Deserialize)]
pub struct TxStatusReply {
    #[serde(default)]
    pub found: bool,
    /// Zero until the transaction is included in a block
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub code: u32,
}

/// The remote operations the ledger exposes
///
/// Every call is endpoint-scoped: the caller decides which endpoint to
/// use, and a sequence fetch and the submission that follows it must go
/// to the same endpoint since endpoints may observe the ledger at
/// slightly different heights.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Query unfulfilled work slots for a topic
    async fn unfulfilled_work(
        &self,
        endpoint: &Endpoint,
        topic_id: u64,
    ) -> Result<String, TransportError>;

    /// Query the current signing sequence for an account
    async fn account_sequence(
        &self,
        endpoint: &Endpoint,
        account: &str,
    ) -> Result<String, TransportError>;

    /// Broadcast a signed submission
    async fn broadcast(
        &self,
        endpoint: &Endpoint,
        payload: &SignedPayload,
    ) -> Result<String, TransportError>;

    /// Query the inclusion status of a broadcast transaction
    async fn tx_status(
        &self,
        endpoint: &Endpoint,
        tx_hash: &str,
    ) -> Result<String, TransportError>;
}

/// JSON/HTTP implementation of [`LedgerClient`]
///
/// One shared connection pool across all endpoints; per-call deadlines
/// (queries are short, submissions get a longer deadline).
pub struct HttpLedgerClient {
    http: reqwest::Client,
    query_timeout: Duration,
    submit_timeout: Duration,
}

impl HttpLedgerClient {
    pub fn new(query_timeout: Duration, submit_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            query_timeout,
            submit_timeout,
        }
    }

    fn url(endpoint: &Endpoint, path: &str) -> String {
        format!("{}{}", endpoint.url.trim_end_matches('/'), path)
    }

    async fn execute(
        &self,
        endpoint: &Endpoint,
        operation: &'static str,
        deadline: Duration,
        request: reqwest::RequestBuilder,
    ) -> Result<String, TransportError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, async {
            let response = request.send().await?;
            response.text().await
        })
        .await;

        metrics()
            .ledger_call_latency
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Err(_) => Err(TransportError::Timeout {
                endpoint: endpoint.label.clone(),
                timeout_ms: deadline.as_millis() as u64,
            }),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::Timeout {
                endpoint: endpoint.label.clone(),
                timeout_ms: deadline.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(TransportError::Connection {
                endpoint: endpoint.label.clone(),
                message: e.to_string(),
            }),
            Ok(Ok(body)) => {
                debug!(
                    endpoint = %endpoint.label,
                    operation,
                    latency_ms = started.elapsed().as_millis() as u64,
                    bytes = body.len(),
                    "Ledger call completed"
                );
                Ok(body)
            }
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn unfulfilled_work(
        &self,
        endpoint: &Endpoint,
        topic_id: u64,
    ) -> Result<String, TransportError> {
        let url = Self::url(endpoint, &format!("/v1/topics/{topic_id}/unfulfilled_nonces"));
        self.execute(
            endpoint,
            "unfulfilled_work",
            self.query_timeout,
            self.http.get(url),
        )
        .await
    }

    async fn account_sequence(
        &self,
        endpoint: &Endpoint,
        account: &str,
    ) -> Result<String, TransportError> {
        let url = Self::url(endpoint, &format!("/v1/accounts/{account}/sequence"));
        self.execute(
            endpoint,
            "account_sequence",
            self.query_timeout,
            self.http.get(url),
        )
        .await
    }

    async fn broadcast(
        &self,
        endpoint: &Endpoint,
        payload: &SignedPayload,
    ) -> Result<String, TransportError> {
        let url = Self::url(endpoint, "/v1/txs");
        self.execute(
            endpoint,
            "broadcast",
            self.submit_timeout,
            self.http.post(url).json(payload),
        )
        .await
    }

    async fn tx_status(
        &self,
        endpoint: &Endpoint,
        tx_hash: &str,
    ) -> Result<String, TransportError> {
        let url = Self::url(endpoint, &format!("/v1/txs/{tx_hash}"));
        self.execute(
            endpoint,
            "tx_status",
            self.query_timeout,
            self.http.get(url),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let endpoint = Endpoint::new("http://node.example/", "node", 1);
        assert_eq!(
            HttpLedgerClient::url(&endpoint, "/v1/txs"),
            "http://node.example/v1/txs"
        );
    }

    #[test]
    fn test_broadcast_reply_tolerates_missing_fields() {
        let reply: BroadcastReply = serde_json::from_str(r#"{"code":32}"#).unwrap();
        assert_eq!(reply.code, 32);
        assert!(reply.tx_hash.is_empty());
        assert!(reply.raw_log.is_empty());
    }

    #[test]
    fn test_tx_status_reply_defaults() {
        let reply: TxStatusReply = serde_json::from_str("{}").unwrap();
        assert!(!reply.found);
        assert_eq!(reply.height, 0);
    }
}
