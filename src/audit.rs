//! Durable append-only audit log of cycle outcomes
//!
//! One record per cycle, written at the moment the cycle closes and never
//! edited or deleted afterwards. The log doubles as the source of truth
//! for "was this cycle already handled": the engine consults it before
//! any network call, which is what makes a crashed cycle safe to re-run.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::confirm::ConfirmationStatus;
use crate::errors::SubmitterError;

/// Terminal record of one cycle
///
/// Fields are a durable contract for external tooling: removal is a
/// breaking change, addition is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub topic_id: u64,
    pub value: f64,
    /// Label of the endpoint used on the terminal attempt, empty when no
    /// endpoint was contacted
    pub endpoint: String,
    /// Number of submission attempts made within the cycle
    pub attempts: u32,
    /// Terminal outcome category
    pub outcome: String,
    pub tx_hash: Option<String>,
    pub confirmation: Option<ConfirmationStatus>,
    /// Empty on success
    pub error_detail: String,
    /// One entry per failed attempt, in order
    pub attempt_errors: Vec<String>,
}

/// Append-only cycle record store over a sled tree
pub struct AuditLog {
    db: sled::Db,
    cycles: sled::Tree,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SubmitterError> {
        let db = sled::open(path)?;
        let cycles = db.open_tree("cycles")?;
        Ok(Self { db, cycles })
    }

    /// Append the terminal record for a cycle
    ///
    /// Refuses to overwrite: a second record for the same cycle is a bug
    /// upstream, not something to paper over. The record is flushed to
    /// disk before this returns.
    pub fn append(&self, record: &CycleRecord) -> Result<(), SubmitterError> {
        let key = record.cycle_id.to_be_bytes();
        let value = serde_json::to_vec(record)?;

        let swap = self
            .cycles
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?;
        if swap.is_err() {
            return Err(SubmitterError::DuplicateCycle {
                cycle_id: record.cycle_id,
            });
        }
        self.cycles.flush()?;

        debug!(
            cycle_id = record.cycle_id,
            outcome = %record.outcome,
            "Audit record appended"
        );
        Ok(())
    }

    /// Terminal record for a cycle, if the cycle is already closed
    pub fn terminal_record(&self, cycle_id: u64) -> Result<Option<CycleRecord>, SubmitterError> {
        match self.cycles.get(cycle_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of closed cycles in the log
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// All records in cycle order
    pub fn records(&self) -> Result<Vec<CycleRecord>, SubmitterError> {
        let mut out = Vec::with_capacity(self.cycles.len());
        for entry in self.cycles.iter() {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Export the log as JSON lines for dashboards and reconciliation
    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, SubmitterError> {
        use std::io::Write;

        let mut file = std::fs::File::create(&path)?;
        let mut count = 0usize;
        for entry in self.cycles.iter() {
            let (_, bytes) = entry?;
            file.write_all(&bytes)?;
            file.write_all(b"\n")?;
            count += 1;
        }
        file.sync_all()?;

        info!(records = count, path = %path.as_ref().display(), "Audit log exported");
        Ok(count)
    }

    /// Flush the underlying store (called on shutdown)
    pub fn flush(&self) -> Result<(), SubmitterError> {
        self.db.flush()?;
        Ok(())
    }
}
