//! Prometheus metrics for the maintenance engine.
//!
//! Provides metrics for:
//! - Job runs by type and outcome, with durations
//! - Records archived and batch throughput
//! - Disk usage and latched breaches
//! - Alert delivery failures and skipped dispatches

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system with the given configuration.
///
/// With a `listen` address the exporter serves the scrape endpoint from a
/// background task, so this must be called inside the tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let Some(listen) = config.listen else {
        tracing::debug!("Metrics enabled without a listen address; exporter not installed");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled && config.listen.is_some() {
        tracing::warn!(
            "Metrics listen address is configured but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
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

/// Record a finished job run.
///
/// # Arguments
/// * `job_type` - e.g. "daily_retention", "emergency_cleanup"
/// * `trigger` - "scheduled", "manual" or "breach"
/// * `success` - whether the run finished without errors
pub fn record_job_run(job_type: &str, trigger: &str, success: bool, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "maintenance_job_runs_total",
            "job_type" => job_type.to_string(),
            "trigger" => trigger.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        histogram!("maintenance_job_duration_seconds", "job_type" => job_type.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job_type, trigger, success, duration_secs);
    }
}

/// Record a dispatch dropped because the same job type was still running.
pub fn record_job_skipped(job_type: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("maintenance_job_skipped_total", "job_type" => job_type.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = job_type;
    }
}

/// Record records removed by the archiver.
///
/// # Arguments
/// * `mode` - archive mode ("standard", "compact", "aggressive")
/// * `count` - number of records deleted in the batch
pub fn record_records_archived(mode: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_records_archived_total", "mode" => mode.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (mode, count);
    }
}

/// Record the wall time of one archive batch.
pub fn record_archive_batch(mode: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("retention_batch_duration_seconds", "mode" => mode.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (mode, duration_secs);
    }
}

/// Record the latest disk sample.
pub fn record_disk_usage(used_percent: f64, used_bytes: u64, total_bytes: u64) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("disk_used_percent").set(used_percent);
        gauge!("disk_used_bytes").set(used_bytes as f64);
        gauge!("disk_total_bytes").set(total_bytes as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (used_percent, used_bytes, total_bytes);
    }
}

/// Record a latch transition. `latched` is 1 while the breach holds.
pub fn record_disk_latch(latched: bool) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("disk_breach_latched").set(if latched { 1.0 } else { 0.0 });
        if latched {
            counter!("disk_breaches_total").increment(1);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = latched;
    }
}

/// Record a failed disk probe.
pub fn record_disk_probe_error() {
    #[cfg(feature = "prometheus")]
    {
        counter!("disk_probe_errors_total").increment(1);
    }
}

/// Record an alert delivery attempt.
///
/// # Arguments
/// * `channel` - "webhook" or "log"
/// * `severity` - alert severity
/// * `delivered` - whether the channel accepted the alert
pub fn record_alert(channel: &str, severity: &str, delivered: bool) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "alerts_sent_total",
            "channel" => channel.to_string(),
            "severity" => severity.to_string()
        )
        .increment(1);
        if !delivered {
            counter!("alert_delivery_failures_total", "channel" => channel.to_string())
                .increment(1);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (channel, severity, delivered);
    }
}

/// Record a settings change, by how it was produced ("update" or "restore").
pub fn record_settings_change(kind: &str, version: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("settings_changes_total", "kind" => kind.to_string()).increment(1);
        gauge!("settings_version").set(version as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, version);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
