//! Error types shared across the submission client

use thiserror::Error;

use crate::classify::ReplyKind;

/// Connection-level failures talking to a ledger endpoint
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The call did not complete within its deadline
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Connection-level failure (DNS, TLS, refused, reset)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Connection { endpoint: String, message: String },
}

impl TransportError {
    /// Endpoint label the failure occurred on
    pub fn endpoint(&self) -> &str {
        match self {
            TransportError::Timeout { endpoint, .. } => endpoint,
            TransportError::Connection { endpoint, .. } => endpoint,
        }
    }
}

/// One failed attempt step, already classified
///
/// Carries everything the engine needs to decide on rotation, penalty,
/// and retry without re-inspecting the raw reply.
#[derive(Debug, Clone, Error)]
#[error("{kind} (endpoint: {endpoint}): {detail}")]
pub struct AttemptError {
    pub kind: ReplyKind,
    pub endpoint: String,
    pub detail: String,
}

impl AttemptError {
    pub fn new(kind: ReplyKind, endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }

    /// Classify a transport failure into an attempt error
    pub fn from_transport(err: TransportError) -> Self {
        let kind = match err {
            TransportError::Timeout { .. } => ReplyKind::Timeout,
            TransportError::Connection { .. } => ReplyKind::TransportError,
        };
        Self {
            kind,
            endpoint: err.endpoint().to_string(),
            detail: err.to_string(),
        }
    }
}

/// Top-level errors of the submission client
#[derive(Debug, Error)]
pub enum SubmitterError {
    /// Static configuration problems: fatal, never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry holds no endpoints at all
    #[error("No endpoints configured")]
    EmptyRegistry,

    /// Prediction value failed the precondition gate
    #[error("Invalid prediction value: {0}")]
    InvalidValue(String),

    /// Keypair loading or signing failure
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// A terminal record already exists for this cycle
    #[error("Cycle {cycle_id} already closed")]
    DuplicateCycle { cycle_id: u64 },

    /// Audit store failure
    #[error("Audit store error: {0}")]
    Audit(#[from] sled::Error),

    /// Record (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
