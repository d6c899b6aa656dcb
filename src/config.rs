//! Configuration module for the submission client
//!
//! This module handles all configuration loading from TOML files,
//! environment variables, and provides structured configuration types.

use serde::{Deserialize, Serialize};

use crate::submit_engine::RetryConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ledger endpoints and call deadlines
    pub ledger: LedgerConfig,

    /// Wallet configuration
    pub wallet: WalletConfig,

    /// Cycle scheduling and retry limits
    pub cycle: CycleConfig,

    /// Prediction value sanity bands
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Backoff between attempts
    #[serde(default)]
    pub retry: RetryConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// One configured ledger endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub url: String,

    /// Human label for logs and audit records; defaults to the URL
    #[serde(default)]
    pub label: String,

    /// Lower rank selects first
    #[serde(default = "default_priority")]
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// List of interchangeable ledger endpoints
    pub endpoints: Vec<EndpointEntry>,

    /// Query deadline in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Submission deadline in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Consecutive failures before an endpoint is excluded from selection
    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Topic the predictions are submitted against
    pub topic_id: u64,

    /// Seconds between scheduling ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum attempts within one cycle
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Path of the audit store
    #[serde(default = "default_audit_path")]
    pub audit_path: String,

    /// File the model step writes the prediction value to
    #[serde(default = "default_prediction_path")]
    pub prediction_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Absolute value above which a warning is logged
    #[serde(default = "default_soft_bound")]
    pub soft_value_bound: f64,

    /// Absolute value above which the cycle aborts before any network call
    #[serde(default = "default_hard_bound")]
    pub hard_value_bound: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_priority() -> u8 { 1 }
fn default_query_timeout() -> u64 { 30 }
fn default_submit_timeout() -> u64 { 120 }
fn default_failure_ceiling() -> u32 { 3 }
fn default_interval() -> u64 { 3600 }
fn default_max_attempts() -> u32 { 3 }
fn default_audit_path() -> String { "submitter-audit.db".to_string() }
fn default_prediction_path() -> String { "prediction.json".to_string() }
fn default_soft_bound() -> f64 { 1e6 }
fn default_hard_bound() -> f64 { 1e9 }
fn default_true() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            soft_value_bound: default_soft_bound(),
            hard_value_bound: default_hard_bound(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variables applied first
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }
}
