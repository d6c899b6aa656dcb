//! Submitter - Resilient Ledger Submission Client
//!
//! Delivers one model prediction per scheduling cycle to a remote ledger,
//! at most once per claimable work slot, across a set of interchangeable
//! and individually unreliable endpoints.
//!
//! ## Components
//!
//! - **Endpoint Registry**: health-tracked endpoint set with rotation
//! - **Response Classifier**: maps raw replies to a closed outcome set
//! - **Nonce Resolver**: work-slot discovery and sequence fetching
//! - **Submission Engine**: bounded per-cycle retry state machine
//! - **Confirmation Verifier**: best-effort post-success inclusion poll
//! - **Audit Log**: durable append-only record of every cycle outcome

pub mod audit;
pub mod classify;
pub mod config;
pub mod confirm;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod nonce;
pub mod registry;
pub mod submit_engine;
pub mod wallet;

#[cfg(test)]
mod tests;

pub use audit::{AuditLog, CycleRecord};
pub use classify::{classify_reply, LedgerOp, ReplyKind};
pub use confirm::ConfirmationStatus;
pub use errors::{AttemptError, SubmitterError, TransportError};
pub use ledger::{HttpLedgerClient, LedgerClient};
pub use nonce::{AccountSequence, WorkSlot};
pub use registry::{Endpoint, EndpointRegistry};
pub use submit_engine::{EngineConfig, RetryConfig, SubmitEngine};
pub use wallet::{SignedPayload, WalletManager};
