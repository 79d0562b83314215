//! Prometheus metrics for the retention engine.
//!
//! Provides metrics for:
//! - Records deleted per collection and rule
//! - Run outcomes and durations
//! - Ticks dropped because a run was still in flight
//!
//! Without the `prometheus` feature every recorder is a no-op.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system and start the scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!("Metrics are enabled but this build lacks the 'prometheus' feature");
    }
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record records deleted by a retention rule.
///
/// # Arguments
/// * `collection` - The collection the records were deleted from
/// * `rule` - Which rule deleted them (`age` or `cap`)
/// * `count` - The number of records deleted
pub fn record_retention_deletion(collection: &str, rule: &'static str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "collection" => collection.to_string(),
            "rule" => rule
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (collection, rule, count);
    }
}

/// Record a finished retention run.
///
/// `outcome` is `success` or `failure`.
pub fn record_retention_run(outcome: &'static str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_runs_total", "outcome" => outcome).increment(1);
        histogram!("retention_run_duration_seconds", "outcome" => outcome).record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record a scheduler tick dropped because a run was still in flight.
pub fn record_retention_skipped_tick() {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_skipped_ticks_total").increment(1);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
