//! Shared helpers for engine scenario tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;

use crate::audit::AuditLog;
use crate::errors::TransportError;
use crate::ledger::LedgerClient;
use crate::registry::{Endpoint, EndpointRegistry};
use crate::submit_engine::{EngineConfig, RetryConfig, SubmitEngine};
use crate::wallet::{SignedPayload, WalletManager};

type Script = Mutex<VecDeque<Result<String, TransportError>>>;

/// Scripted ledger: each operation pops its next reply from a queue.
/// An unscripted call fails loudly as a connection error.
#[derive(Default)]
pub struct MockLedger {
    work: Script,
    seq: Script,
    submit: Script,
    status: Script,

    /// Endpoint labels seen per operation, in call order
    pub work_endpoints: Mutex<Vec<String>>,
    pub seq_endpoints: Mutex<Vec<String>>,
    pub submit_endpoints: Mutex<Vec<String>>,
    /// Sequence numbers carried by broadcast payloads
    pub submitted_sequences: Mutex<Vec<u64>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_work(&self, reply: Result<String, TransportError>) {
        self.work.lock().unwrap().push_back(reply);
    }

    pub fn script_seq(&self, reply: Result<String, TransportError>) {
        self.seq.lock().unwrap().push_back(reply);
    }

    pub fn script_submit(&self, reply: Result<String, TransportError>) {
        self.submit.lock().unwrap().push_back(reply);
    }

    pub fn script_status(&self, reply: Result<String, TransportError>) {
        self.status.lock().unwrap().push_back(reply);
    }

    pub fn work_calls(&self) -> usize {
        self.work_endpoints.lock().unwrap().len()
    }

    pub fn work_labels(&self) -> Vec<String> {
        self.work_endpoints.lock().unwrap().clone()
    }

    pub fn submit_labels(&self) -> Vec<String> {
        self.submit_endpoints.lock().unwrap().clone()
    }

    pub fn seq_labels(&self) -> Vec<String> {
        self.seq_endpoints.lock().unwrap().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.submitted_sequences.lock().unwrap().clone()
    }

    fn pop(script: &Script, endpoint: &Endpoint) -> Result<String, TransportError> {
        script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(TransportError::Connection {
                endpoint: endpoint.label.clone(),
                message: "unscripted call".to_string(),
            })
        })
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn unfulfilled_work(
        &self,
        endpoint: &Endpoint,
        _topic_id: u64,
    ) -> Result<String, TransportError> {
        self.work_endpoints
            .lock()
            .unwrap()
            .push(endpoint.label.clone());
        Self::pop(&self.work, endpoint)
    }

    async fn account_sequence(
        &self,
        endpoint: &Endpoint,
        _account: &str,
    ) -> Result<String, TransportError> {
        self.seq_endpoints
            .lock()
            .unwrap()
            .push(endpoint.label.clone());
        Self::pop(&self.seq, endpoint)
    }

    async fn broadcast(
        &self,
        endpoint: &Endpoint,
        payload: &SignedPayload,
    ) -> Result<String, TransportError> {
        self.submit_endpoints
            .lock()
            .unwrap()
            .push(endpoint.label.clone());
        self.submitted_sequences
            .lock()
            .unwrap()
            .push(payload.body.sequence);
        Self::pop(&self.submit, endpoint)
    }

    async fn tx_status(
        &self,
        endpoint: &Endpoint,
        _tx_hash: &str,
    ) -> Result<String, TransportError> {
        Self::pop(&self.status, endpoint)
    }
}

// Reply body builders

pub fn work_body(height: u64) -> String {
    format!(r#"{{"nonces":[{{"topic_id":3,"block_height":{height},"fulfilled":false}}]}}"#)
}

pub fn empty_work_body() -> String {
    r#"{"nonces":[]}"#.to_string()
}

pub fn seq_body(sequence: u64) -> String {
    format!(r#"{{"account":"test-account","sequence":{sequence}}}"#)
}

pub fn accepted_body(tx_hash: &str) -> String {
    format!(r#"{{"code":0,"tx_hash":"{tx_hash}","raw_log":""}}"#)
}

pub fn rejected_body(code: u32, raw_log: &str) -> String {
    format!(r#"{{"code":{code},"tx_hash":"","raw_log":"{raw_log}"}}"#)
}

pub fn included_status_body() -> String {
    r#"{"found":true,"height":123456,"code":0}"#.to_string()
}

pub fn conn_refused(endpoint: &str) -> TransportError {
    TransportError::Connection {
        endpoint: endpoint.to_string(),
        message: "connection refused".to_string(),
    }
}

/// Fully wired engine over a scripted ledger and a temp audit store
pub struct Harness {
    pub engine: SubmitEngine,
    pub registry: Arc<EndpointRegistry>,
    pub ledger: Arc<MockLedger>,
    pub audit: Arc<AuditLog>,
    _dir: tempfile::TempDir,
}

pub fn harness(labels: &[&str], failure_ceiling: u32, max_attempts: u32) -> Harness {
    let endpoints = labels
        .iter()
        .map(|l| Endpoint::new(format!("http://{l}.example"), *l, 1))
        .collect();
    let registry = Arc::new(EndpointRegistry::new(endpoints, failure_ceiling));

    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().expect("temp dir");
    let audit = Arc::new(AuditLog::open(dir.path().join("audit")).expect("audit store"));
    let wallet = WalletManager::from_signing_key(SigningKey::from_bytes(&[7u8; 32]));

    let engine = SubmitEngine::new(
        Arc::clone(&registry),
        Arc::clone(&ledger) as Arc<dyn LedgerClient>,
        wallet,
        Arc::clone(&audit),
        EngineConfig {
            max_attempts,
            soft_value_bound: 1e6,
            hard_value_bound: 1e9,
            retry: RetryConfig {
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                jitter_factor: 0.0,
            },
        },
    );

    Harness {
        engine,
        registry,
        ledger,
        audit,
        _dir: dir,
    }
}
