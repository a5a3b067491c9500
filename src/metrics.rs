//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a finished job by outcome
pub fn record_job(status: &'static str) {
    metrics::counter!("modelstore_jobs_total", "status" => status).increment(1);
}

/// Record a successful generation call
pub fn record_generation(elapsed: Duration, tokens_generated: usize) {
    metrics::histogram!("modelstore_generation_seconds").record(elapsed.as_secs_f64());
    metrics::counter!("modelstore_generated_tokens_total").increment(tokens_generated as u64);
}

/// Record a failed exchange with the job runtime
pub fn record_runtime_error(operation: &'static str) {
    metrics::counter!("modelstore_runtime_errors_total", "operation" => operation).increment(1);
}
