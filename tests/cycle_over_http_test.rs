//! End-to-end cycle test: real engine, real HTTP client, mock ledger server

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use submitter::config::EndpointEntry;
use submitter::submit_engine::{EngineConfig, RetryConfig};
use submitter::{
    AuditLog, ConfirmationStatus, EndpointRegistry, HttpLedgerClient, SubmitEngine, WalletManager,
};

#[tokio::test]
async fn test_full_cycle_success_over_http() {
    let mut server = mockito::Server::new_async().await;
    let wallet = WalletManager::from_signing_key(SigningKey::from_bytes(&[7u8; 32]));
    let account = wallet.account();

    let work_mock = server
        .mock("GET", "/v1/topics/3/unfulfilled_nonces")
        .with_status(200)
        .with_body(r#"{"nonces":[{"topic_id":3,"block_height":777,"fulfilled":false}]}"#)
        .create_async()
        .await;
    let seq_mock = server
        .mock("GET", format!("/v1/accounts/{account}/sequence").as_str())
        .with_status(200)
        .with_body(format!(r#"{{"account":"{account}","sequence":5}}"#))
        .create_async()
        .await;
    let submit_mock = server
        .mock("POST", "/v1/txs")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_body(r#"{"code":0,"tx_hash":"DEADBEEF","raw_log":""}"#)
        .create_async()
        .await;
    let status_mock = server
        .mock("GET", "/v1/txs/DEADBEEF")
        .with_status(200)
        .with_body(r#"{"found":true,"height":4242,"code":0}"#)
        .create_async()
        .await;

    let entries = vec![EndpointEntry {
        url: server.url(),
        label: "mock".to_string(),
        priority: 1,
    }];
    let registry = Arc::new(EndpointRegistry::from_entries(&entries, 3));
    let ledger = Arc::new(HttpLedgerClient::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));

    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::open(dir.path().join("audit")).unwrap());

    let engine = SubmitEngine::new(
        Arc::clone(&registry),
        ledger,
        wallet,
        Arc::clone(&audit),
        EngineConfig {
            max_attempts: 3,
            soft_value_bound: 1e6,
            hard_value_bound: 1e9,
            retry: RetryConfig {
                base_backoff_ms: 1,
                max_backoff_ms: 5,
                jitter_factor: 0.0,
            },
        },
    );

    let record = engine.run_cycle(100, 3, 42.5).await.unwrap();

    assert_eq!(record.outcome, "success");
    assert_eq!(record.attempts, 1);
    assert_eq!(record.endpoint, "mock");
    assert_eq!(record.tx_hash.as_deref(), Some("DEADBEEF"));
    assert_eq!(record.confirmation, Some(ConfirmationStatus::Confirmed));

    work_mock.assert_async().await;
    seq_mock.assert_async().await;
    submit_mock.assert_async().await;
    status_mock.assert_async().await;

    // The terminal record is durable and re-readable
    assert_eq!(
        audit.terminal_record(100).unwrap().unwrap().tx_hash.as_deref(),
        Some("DEADBEEF")
    );
}
