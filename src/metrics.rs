//! Metrics collection and export module

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub cycles_total: IntCounter,
    pub cycles_success: IntCounter,
    pub cycles_no_work: IntCounter,
    pub cycles_exhausted: IntCounter,
    pub cycles_fatal: IntCounter,
    pub submit_attempts_total: IntCounter,
    pub endpoint_failures_total: IntCounter,
    pub sequence_refetch_total: IntCounter,
    pub confirmations_unknown: IntCounter,

    // Gauges
    pub endpoints_total: IntGauge,
    pub endpoints_at_ceiling: IntGauge,

    // Histograms
    pub cycle_latency: Histogram,
    pub ledger_call_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounter::with_opts(Opts::new(
            "cycles_total",
            "Total number of submission cycles run",
        ))?;

        let cycles_success = IntCounter::with_opts(Opts::new(
            "cycles_success",
            "Cycles closed with a successful submission",
        ))?;

        let cycles_no_work = IntCounter::with_opts(Opts::new(
            "cycles_no_work",
            "Cycles closed with no claimable work",
        ))?;

        let cycles_exhausted = IntCounter::with_opts(Opts::new(
            "cycles_exhausted",
            "Cycles closed after exhausting the retry ceiling",
        ))?;

        let cycles_fatal = IntCounter::with_opts(Opts::new(
            "cycles_fatal",
            "Cycles closed by a fatal (non-retryable) failure",
        ))?;

        let submit_attempts_total = IntCounter::with_opts(Opts::new(
            "submit_attempts_total",
            "Submission attempts across all cycles",
        ))?;

        let endpoint_failures_total = IntCounter::with_opts(Opts::new(
            "endpoint_failures_total",
            "Failures charged against endpoints",
        ))?;

        let sequence_refetch_total = IntCounter::with_opts(Opts::new(
            "sequence_refetch_total",
            "Sequence re-fetches triggered by mismatch replies",
        ))?;

        let confirmations_unknown = IntCounter::with_opts(Opts::new(
            "confirmations_unknown",
            "Successful submissions whose inclusion could not be confirmed",
        ))?;

        let endpoints_total = IntGauge::with_opts(Opts::new(
            "endpoints_total",
            "Number of configured ledger endpoints",
        ))?;

        let endpoints_at_ceiling = IntGauge::with_opts(Opts::new(
            "endpoints_at_ceiling",
            "Endpoints currently excluded by the failure ceiling",
        ))?;

        let cycle_latency = Histogram::with_opts(
            HistogramOpts::new("cycle_latency_seconds", "End-to-end cycle duration")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0]),
        )?;

        let ledger_call_latency = Histogram::with_opts(
            HistogramOpts::new("ledger_call_latency_seconds", "Single ledger call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycles_success.clone()))?;
        registry.register(Box::new(cycles_no_work.clone()))?;
        registry.register(Box::new(cycles_exhausted.clone()))?;
        registry.register(Box::new(cycles_fatal.clone()))?;
        registry.register(Box::new(submit_attempts_total.clone()))?;
        registry.register(Box::new(endpoint_failures_total.clone()))?;
        registry.register(Box::new(sequence_refetch_total.clone()))?;
        registry.register(Box::new(confirmations_unknown.clone()))?;
        registry.register(Box::new(endpoints_total.clone()))?;
        registry.register(Box::new(endpoints_at_ceiling.clone()))?;
        registry.register(Box::new(cycle_latency.clone()))?;
        registry.register(Box::new(ledger_call_latency.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycles_success,
            cycles_no_work,
            cycles_exhausted,
            cycles_fatal,
            submit_attempts_total,
            endpoint_failures_total,
            sequence_refetch_total,
            confirmations_unknown,
            endpoints_total,
            endpoints_at_ceiling,
            cycle_latency,
            ledger_call_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode the registry in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Serve the metrics registry as plaintext on a TCP port
pub async fn serve_metrics(port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Metrics endpoint listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((mut socket, _addr)) => {
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};

                    let mut buf = [0; 1024];
                    match socket.read(&mut buf).await {
                        Ok(_) => {
                            let body = metrics().encode().unwrap_or_default();
                            let response = format!(
                                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                        }
                        Err(e) => {
                            tracing::error!("Failed to read from socket: {}", e);
                        }
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_encode() {
        let m = metrics();
        m.cycles_total.inc();
        let encoded = m.encode().unwrap();
        assert!(encoded.contains("cycles_total"));
        assert!(encoded.contains("cycle_latency_seconds"));
    }
}
