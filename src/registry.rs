//! Endpoint registry with per-endpoint health tracking and rotation
//!
//! Holds the set of interchangeable ledger endpoints and their health
//! counters. Selection prefers the highest-priority endpoint whose
//! consecutive-failure count is below the ceiling, breaking ties by
//! round-robin so equal-priority endpoints are not starved. When every
//! endpoint sits at the ceiling the registry degrades to round-robin by
//! resetting all counts instead of locking out entirely.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::EndpointEntry;
use crate::errors::SubmitterError;

/// One ledger endpoint and its mutable health state
///
/// Created once at startup, mutated after every attempt, never destroyed
/// during a run.
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    pub label: String,
    /// Lower rank selects first
    pub priority: u8,

    consecutive_failures: AtomicU32,
    successes: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_failure_at: Mutex<Option<DateTime<Utc>>>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, label: impl Into<String>, priority: u8) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            priority,
            consecutive_failures: AtomicU32::new(0),
            successes: AtomicU64::new(0),
            last_error: Mutex::new(None),
            last_failure_at: Mutex::new(None),
        }
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        *self.last_failure_at.lock()
    }
}

/// Point-in-time snapshot of one endpoint's counters
#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub label: String,
    pub priority: u8,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub last_error: Option<String>,
}

/// Registry over the configured endpoint set
///
/// The registry is the only state shared across attempts and cycles; it
/// is mutated exclusively through [`record_failure`](Self::record_failure)
/// and [`record_success`](Self::record_success).
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: AtomicUsize,
    failure_ceiling: u32,
}

impl EndpointRegistry {
    pub fn new(endpoints: Vec<Endpoint>, failure_ceiling: u32) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            failure_ceiling: failure_ceiling.max(1),
        }
    }

    /// Build from configuration entries; an empty label falls back to the URL
    pub fn from_entries(entries: &[EndpointEntry], failure_ceiling: u32) -> Self {
        let endpoints = entries
            .iter()
            .map(|e| {
                let label = if e.label.is_empty() {
                    e.url.clone()
                } else {
                    e.label.clone()
                };
                Endpoint::new(e.url.clone(), label, e.priority)
            })
            .collect();
        Self::new(endpoints, failure_ceiling)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn failure_ceiling(&self) -> u32 {
        self.failure_ceiling
    }

    /// Select the next endpoint to use
    ///
    /// If no endpoint is eligible, performs one full ceiling reset across
    /// all endpoints and retries selection once. An empty registry is a
    /// configuration error, distinct from any transient failure.
    pub fn select(&self) -> Result<Arc<Endpoint>, SubmitterError> {
        if self.endpoints.is_empty() {
            return Err(SubmitterError::EmptyRegistry);
        }

        if let Some(ep) = self.pick() {
            return Ok(ep);
        }

        warn!(
            ceiling = self.failure_ceiling,
            total = self.endpoints.len(),
            "All endpoints at failure ceiling, resetting counts"
        );
        self.reset_all();

        // Non-empty registry always yields after a reset
        self.pick().ok_or(SubmitterError::EmptyRegistry)
    }

    fn pick(&self) -> Option<Arc<Endpoint>> {
        let eligible: Vec<&Arc<Endpoint>> = self
            .endpoints
            .iter()
            .filter(|e| e.failures() < self.failure_ceiling)
            .collect();

        let best_priority = eligible.iter().map(|e| e.priority).min()?;
        let tier: Vec<&Arc<Endpoint>> = eligible
            .into_iter()
            .filter(|e| e.priority == best_priority)
            .collect();

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % tier.len();
        let selected = Arc::clone(tier[idx]);
        debug!(
            endpoint = %selected.label,
            priority = selected.priority,
            failures = selected.failures(),
            "Selected endpoint"
        );
        Some(selected)
    }

    /// Record a failed attempt against an endpoint
    ///
    /// The failure count is clamped at the ceiling. Never creates
    /// endpoints.
    pub fn record_failure(&self, endpoint: &Endpoint, error: &str) {
        let ceiling = self.failure_ceiling;
        let _ = endpoint
            .consecutive_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |f| {
                if f < ceiling {
                    Some(f + 1)
                } else {
                    None
                }
            });
        *endpoint.last_error.lock() = Some(error.to_string());
        *endpoint.last_failure_at.lock() = Some(Utc::now());

        debug!(
            endpoint = %endpoint.label,
            failures = endpoint.failures(),
            ceiling,
            "Recorded endpoint failure"
        );
    }

    /// Record a successful attempt: the failure count resets to zero
    pub fn record_success(&self, endpoint: &Endpoint) {
        endpoint.consecutive_failures.store(0, Ordering::Relaxed);
        endpoint.successes.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %endpoint.label, "Recorded endpoint success");
    }

    fn reset_all(&self) {
        for ep in &self.endpoints {
            ep.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    /// Number of endpoints currently at the failure ceiling
    pub fn at_ceiling(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|e| e.failures() >= self.failure_ceiling)
            .count()
    }

    /// Snapshot of all endpoint counters, in configuration order
    pub fn stats(&self) -> Vec<EndpointStats> {
        self.endpoints
            .iter()
            .map(|e| EndpointStats {
                label: e.label.clone(),
                priority: e.priority,
                consecutive_failures: e.failures(),
                successes: e.successes(),
                last_error: e.last_error(),
            })
            .collect()
    }
}
