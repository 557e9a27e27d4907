//! Prometheus metrics exposition
//!
//! Service-level metrics:
//!
//! - `auth_requests_total` (counter): labels `endpoint`, `status`
//! - `auth_request_duration_seconds` (histogram): label `endpoint`
//!
//! The lifecycle crate additionally records
//! `provider_token_exchanges_total{grant, outcome}` and
//! `accounts_linked_total` through the same recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Configures `auth_request_duration_seconds` with explicit buckets so
/// it renders as a histogram (with `_bucket` lines) rather than the
/// default summary. The range covers sub-millisecond local hits up to
/// the provider timeout ceiling.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "auth_request_duration_seconds".to_string(),
            ),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed API request with endpoint and status labels.
pub fn record_request(endpoint: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "auth_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("auth_request_duration_seconds", "endpoint" => endpoint)
        .record(duration_secs);
}
