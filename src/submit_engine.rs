//! Submission engine: drives one cycle from work discovery to a durably
//! recorded terminal outcome
//!
//! Per cycle the engine resolves claimable work, fetches a fresh account
//! sequence, submits the signed prediction, classifies the reply, and
//! either retries (rotating endpoints where the classification calls for
//! it) or finalizes. The engine is the single fault boundary of the
//! client: whatever happens inside a cycle, exactly one terminal audit
//! record is written for it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditLog, CycleRecord};
use crate::classify::{classify_reply, submit_error_detail, LedgerOp, ReplyKind};
use crate::confirm::{verify_inclusion, ConfirmationStatus};
use crate::errors::{AttemptError, SubmitterError};
use crate::ledger::{BroadcastReply, LedgerClient};
use crate::metrics::metrics;
use crate::nonce::{fetch_sequence, find_claimable_work};
use crate::registry::{Endpoint, EndpointRegistry};
use crate::wallet::WalletManager;

/// Backoff configuration with jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Jitter factor (0.0 to 1.0) - adds randomness to backoff
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 5000 }
fn default_jitter_factor() -> f64 { 0.2 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Calculate backoff delay for a given attempt (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt as i32);
        let capped_backoff = exp_backoff.min(self.max_backoff_ms as f64);

        // Add jitter to prevent thundering herd
        let mut rng = rand::thread_rng();
        let jitter_range = capped_backoff * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_backoff = (capped_backoff + jitter).max(0.0);

        Duration::from_millis(final_backoff as u64)
    }
}

/// Engine limits and policy knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum attempts within one cycle, regardless of error category
    pub max_attempts: u32,

    /// Absolute value above which a warning is logged
    pub soft_value_bound: f64,

    /// Absolute value above which the cycle aborts before any network call
    pub hard_value_bound: f64,

    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            soft_value_bound: 1e6,
            hard_value_bound: 1e9,
            retry: RetryConfig::default(),
        }
    }
}

/// Terminal outcome categories of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCategory {
    Success,
    NoWork,
    Exhausted,
    Fatal,
}

impl OutcomeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::Success => "success",
            OutcomeCategory::NoWork => "no_work",
            OutcomeCategory::Exhausted => "exhausted",
            OutcomeCategory::Fatal => "fatal",
        }
    }
}

/// Terminal state of the attempt loop, before it becomes a record
struct Terminal {
    category: OutcomeCategory,
    endpoint: String,
    submit_attempts: u32,
    tx_hash: Option<String>,
    confirmation: Option<ConfirmationStatus>,
    error_detail: String,
    attempt_errors: Vec<String>,
}

impl Terminal {
    fn fatal(
        endpoint: String,
        submit_attempts: u32,
        detail: String,
        attempt_errors: Vec<String>,
    ) -> Self {
        Self {
            category: OutcomeCategory::Fatal,
            endpoint,
            submit_attempts,
            tx_hash: None,
            confirmation: None,
            error_detail: detail,
            attempt_errors,
        }
    }
}

enum AttemptOutcome {
    NoWork,
    Submitted { tx_hash: String },
}

enum AttemptFailure {
    Reply(AttemptError),
    Internal(String),
}

impl From<AttemptError> for AttemptFailure {
    fn from(err: AttemptError) -> Self {
        AttemptFailure::Reply(err)
    }
}

/// Drives submission cycles against the ledger
pub struct SubmitEngine {
    registry: Arc<EndpointRegistry>,
    ledger: Arc<dyn LedgerClient>,
    wallet: WalletManager,
    audit: Arc<AuditLog>,
    config: EngineConfig,
}

impl SubmitEngine {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        ledger: Arc<dyn LedgerClient>,
        wallet: WalletManager,
        audit: Arc<AuditLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            wallet,
            audit,
            config,
        }
    }

    /// Run one cycle to a terminal outcome
    ///
    /// The prediction value is fixed input for the whole cycle. Exactly
    /// one terminal audit record exists for `cycle_id` when this returns,
    /// whether the cycle ran now or was already closed by an earlier run.
    #[instrument(skip(self))]
    pub async fn run_cycle(
        &self,
        cycle_id: u64,
        topic_id: u64,
        value: f64,
    ) -> Result<CycleRecord, SubmitterError> {
        let started = Instant::now();

        // Idempotence gate: a crashed or restarted scheduler may hand us a
        // cycle that already closed. Checked before any network call.
        if let Some(existing) = self.audit.terminal_record(cycle_id)? {
            info!(
                cycle_id,
                outcome = %existing.outcome,
                "Cycle already closed, not re-running"
            );
            return Ok(existing);
        }

        metrics().cycles_total.inc();
        let correlation_id = Uuid::new_v4();
        info!(cycle_id, topic_id, value, correlation_id = %correlation_id, "Cycle started");

        // Precondition gate, also before any network call
        if let Err(reason) = self.validate_value(value) {
            error!(cycle_id, %reason, "Prediction value rejected");
            let terminal = Terminal::fatal(String::new(), 0, reason, Vec::new());
            return self.close(cycle_id, topic_id, value, started, terminal);
        }

        let terminal = self.drive(cycle_id, topic_id, value).await;
        self.close(cycle_id, topic_id, value, started, terminal)
    }

    fn validate_value(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("prediction value is not finite: {value}"));
        }
        if value.abs() > self.config.hard_value_bound {
            return Err(format!(
                "prediction value {value} exceeds hard bound {}",
                self.config.hard_value_bound
            ));
        }
        if value.abs() > self.config.soft_value_bound {
            warn!(
                value,
                soft_bound = self.config.soft_value_bound,
                "Prediction value outside the expected band"
            );
        }
        Ok(())
    }

    /// The bounded attempt loop
    async fn drive(&self, cycle_id: u64, topic_id: u64, value: f64) -> Terminal {
        let max_attempts = self.config.max_attempts.max(1);
        let mut submit_attempts: u32 = 0;
        let mut attempt_errors: Vec<String> = Vec::new();
        let mut last_endpoint = String::new();
        // Set when the failed classification pins the next attempt to the
        // same endpoint (ledger-state errors re-read that endpoint's view)
        let mut pinned: Option<Arc<Endpoint>> = None;

        for attempt in 1..=max_attempts {
            let endpoint = match pinned.take() {
                Some(ep) => ep,
                None => match self.registry.select() {
                    Ok(ep) => ep,
                    Err(e) => {
                        return Terminal::fatal(
                            last_endpoint,
                            submit_attempts,
                            format!("endpoint selection failed: {e}"),
                            attempt_errors,
                        );
                    }
                },
            };
            last_endpoint = endpoint.label.clone();

            debug!(
                cycle_id,
                attempt,
                max_attempts,
                endpoint = %endpoint.label,
                "Starting attempt"
            );

            match self
                .attempt(topic_id, value, &endpoint, &mut submit_attempts)
                .await
            {
                Ok(AttemptOutcome::NoWork) => {
                    return Terminal {
                        category: OutcomeCategory::NoWork,
                        endpoint: endpoint.label.clone(),
                        submit_attempts,
                        tx_hash: None,
                        confirmation: None,
                        error_detail: String::new(),
                        attempt_errors,
                    };
                }
                Ok(AttemptOutcome::Submitted { tx_hash }) => {
                    self.registry.record_success(&endpoint);
                    let confirmation = self.confirm(&endpoint, &tx_hash).await;
                    if confirmation == ConfirmationStatus::Unknown {
                        metrics().confirmations_unknown.inc();
                    }
                    return Terminal {
                        category: OutcomeCategory::Success,
                        endpoint: endpoint.label.clone(),
                        submit_attempts,
                        tx_hash: Some(tx_hash),
                        confirmation: Some(confirmation),
                        error_detail: String::new(),
                        attempt_errors,
                    };
                }
                Err(AttemptFailure::Internal(detail)) => {
                    return Terminal::fatal(
                        endpoint.label.clone(),
                        submit_attempts,
                        detail,
                        attempt_errors,
                    );
                }
                Err(AttemptFailure::Reply(err)) => {
                    warn!(
                        cycle_id,
                        attempt,
                        endpoint = %endpoint.label,
                        kind = %err.kind,
                        detail = %err.detail,
                        "Attempt failed"
                    );
                    attempt_errors.push(err.to_string());

                    if err.kind.penalizes_endpoint() {
                        self.registry.record_failure(&endpoint, &err.detail);
                        metrics().endpoint_failures_total.inc();
                        metrics()
                            .endpoints_at_ceiling
                            .set(self.registry.at_ceiling() as i64);
                    }

                    if !err.kind.is_retryable() {
                        return Terminal::fatal(
                            endpoint.label.clone(),
                            submit_attempts,
                            err.to_string(),
                            attempt_errors,
                        );
                    }

                    if err.kind == ReplyKind::SequenceMismatch {
                        metrics().sequence_refetch_total.inc();
                    }
                    if !err.kind.rotates_endpoint() {
                        pinned = Some(endpoint);
                    }

                    if attempt < max_attempts {
                        let delay = self.config.retry.calculate_backoff(attempt - 1);
                        debug!(
                            delay_ms = delay.as_millis() as u64,
                            "Backing off before next attempt"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Terminal {
            category: OutcomeCategory::Exhausted,
            endpoint: last_endpoint,
            submit_attempts,
            tx_hash: None,
            confirmation: None,
            error_detail: attempt_errors.join("; "),
            attempt_errors,
        }
    }

    /// One attempt: resolve work and sequence on an endpoint, then submit
    /// to the same endpoint
    async fn attempt(
        &self,
        topic_id: u64,
        value: f64,
        endpoint: &Endpoint,
        submit_attempts: &mut u32,
    ) -> Result<AttemptOutcome, AttemptFailure> {
        let slot = find_claimable_work(self.ledger.as_ref(), endpoint, topic_id).await?;
        let Some(slot) = slot else {
            return Ok(AttemptOutcome::NoWork);
        };

        // The sequence is fetched fresh for every attempt; a cached one
        // is the most common cause of rejected submissions.
        let sequence =
            fetch_sequence(self.ledger.as_ref(), endpoint, &self.wallet.account()).await?;

        let payload = self
            .wallet
            .sign_submission(topic_id, slot.block_height, value, sequence.0)
            .map_err(|e| AttemptFailure::Internal(format!("signing failed: {e}")))?;

        *submit_attempts += 1;
        metrics().submit_attempts_total.inc();

        let raw = self
            .ledger
            .broadcast(endpoint, &payload)
            .await
            .map_err(|e| AttemptFailure::Reply(AttemptError::from_transport(e)))?;

        match classify_reply(LedgerOp::Submit, &raw) {
            ReplyKind::Success => {
                let reply: BroadcastReply = serde_json::from_str(&raw)
                    .map_err(|e| AttemptFailure::Internal(format!("accepted reply unparseable: {e}")))?;
                info!(
                    endpoint = %endpoint.label,
                    tx_hash = %reply.tx_hash,
                    block_height = slot.block_height,
                    sequence = sequence.0,
                    "Submission accepted"
                );
                Ok(AttemptOutcome::Submitted {
                    tx_hash: reply.tx_hash,
                })
            }
            kind => Err(AttemptFailure::Reply(AttemptError::new(
                kind,
                &endpoint.label,
                submit_error_detail(&raw),
            ))),
        }
    }

    /// Best-effort inclusion poll; never changes the outcome
    async fn confirm(&self, submitted: &Arc<Endpoint>, tx_hash: &str) -> ConfirmationStatus {
        let fallback = self
            .registry
            .select()
            .ok()
            .filter(|ep| ep.label != submitted.label);
        verify_inclusion(
            self.ledger.as_ref(),
            submitted,
            fallback.as_deref(),
            tx_hash,
        )
        .await
    }

    /// Build, persist and log the single terminal record of the cycle
    fn close(
        &self,
        cycle_id: u64,
        topic_id: u64,
        value: f64,
        started: Instant,
        terminal: Terminal,
    ) -> Result<CycleRecord, SubmitterError> {
        let category = terminal.category;
        let record = CycleRecord {
            cycle_id,
            timestamp: Utc::now(),
            topic_id,
            value,
            endpoint: terminal.endpoint,
            attempts: terminal.submit_attempts,
            outcome: category.as_str().to_string(),
            tx_hash: terminal.tx_hash,
            confirmation: terminal.confirmation,
            error_detail: terminal.error_detail,
            attempt_errors: terminal.attempt_errors,
        };

        self.audit.append(&record)?;
        metrics().cycle_latency.observe(started.elapsed().as_secs_f64());

        match category {
            OutcomeCategory::Success => {
                metrics().cycles_success.inc();
                info!(
                    cycle_id,
                    tx_hash = record.tx_hash.as_deref().unwrap_or(""),
                    attempts = record.attempts,
                    confirmation = ?record.confirmation,
                    "Cycle closed: submission delivered"
                );
            }
            OutcomeCategory::NoWork => {
                metrics().cycles_no_work.inc();
                info!(cycle_id, "Cycle closed: no claimable work");
            }
            OutcomeCategory::Exhausted => {
                metrics().cycles_exhausted.inc();
                error!(
                    cycle_id,
                    attempts = record.attempts,
                    errors = ?record.attempt_errors,
                    "Cycle closed: retries exhausted"
                );
            }
            OutcomeCategory::Fatal => {
                metrics().cycles_fatal.inc();
                error!(
                    cycle_id,
                    detail = %record.error_detail,
                    "Cycle closed: fatal failure"
                );
            }
        }

        Ok(record)
    }
}
