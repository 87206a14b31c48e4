//! Prometheus metrics for observability and monitoring.
//!
//! [`PrometheusTelemetry`] implements the injected
//! [`Telemetry`](redpacket_core::environment::Telemetry) interface on top of
//! the `metrics` facade. [`install_recorder`] installs the Prometheus exporter
//! once per process and returns the handle that `/metrics` renders.
//!
//! # Exported Metrics
//!
//! - `redpacket_claims_total{status}` - claims by outcome (`OK`, `SOLD_OUT`, ..., `error`)
//! - `redpacket_claim_duration_seconds` - time spent deciding a claim
//! - `redpacket_campaigns_created_total` - campaigns persisted and primed
//! - `redpacket_events_published_total{result}` - `published`, `failed`, `dropped`
//! - `redpacket_events_recorded_total{outcome}` - `recorded`, `duplicate`, `dead_lettered`, `dropped`
//! - `redpacket_dead_lettered_total` - events parked in the dead-letter queue
//!
//! # Example
//!
//! ```rust,no_run
//! use redpacket_runtime::metrics::{install_recorder, PrometheusTelemetry};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//! let telemetry = PrometheusTelemetry;
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use redpacket_core::claim::ClaimStatus;
use redpacket_core::environment::{PublishResult, RecordResult, Telemetry};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "redpacket_claims_total",
        "Total number of claims by outcome status"
    );
    describe_histogram!(
        "redpacket_claim_duration_seconds",
        "Time taken to decide a claim, including the cache round trip"
    );
    describe_counter!(
        "redpacket_campaigns_created_total",
        "Total number of campaigns persisted and primed"
    );
    describe_counter!(
        "redpacket_events_published_total",
        "Claim events leaving the publisher, by result"
    );
    describe_counter!(
        "redpacket_events_recorded_total",
        "Claim deliveries handled by the recorder, by outcome"
    );
    describe_counter!(
        "redpacket_dead_lettered_total",
        "Claim events parked in the dead-letter queue"
    );
    describe_counter!(
        "redpacket_http_requests_total",
        "HTTP requests by method, route and status"
    );
    describe_histogram!(
        "redpacket_http_request_duration_seconds",
        "HTTP request latency by method and route"
    );
}

/// [`Telemetry`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusTelemetry;

impl Telemetry for PrometheusTelemetry {
    fn claim_decided(&self, status: ClaimStatus, elapsed: Duration) {
        metrics::counter!("redpacket_claims_total", "status" => status.as_str()).increment(1);
        metrics::histogram!("redpacket_claim_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn claim_failed(&self, elapsed: Duration) {
        metrics::counter!("redpacket_claims_total", "status" => "error").increment(1);
        metrics::histogram!("redpacket_claim_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn campaign_created(&self) {
        metrics::counter!("redpacket_campaigns_created_total").increment(1);
    }

    fn event_published(&self, result: PublishResult) {
        metrics::counter!("redpacket_events_published_total", "result" => result.as_str())
            .increment(1);
    }

    fn event_recorded(&self, result: RecordResult) {
        metrics::counter!("redpacket_events_recorded_total", "outcome" => result.as_str())
            .increment(1);
        if result == RecordResult::DeadLettered {
            metrics::counter!("redpacket_dead_lettered_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_without_recorder_is_harmless() {
        // With no recorder installed the facade discards everything.
        let telemetry = PrometheusTelemetry;
        telemetry.claim_decided(ClaimStatus::Ok, Duration::from_millis(2));
        telemetry.event_recorded(RecordResult::DeadLettered);
    }
}
