//! Prometheus metrics infrastructure.
//!
//! Metrics are recorded through the `metrics` facade from every crate and
//! rendered here by `metrics-exporter-prometheus`.
//!
//! # Metrics Exposed
//!
//! - `fluxgate_http_requests_total` - HTTP requests by method, path, status class
//! - `fluxgate_http_request_duration_seconds` - HTTP request duration histogram
//! - `fluxgate_query_duration_seconds` - backend query duration by outcome
//! - `fluxgate_query_retries_total` - backend query retries
//! - `fluxgate_query_failures_total` - backend queries that gave up, by kind
//! - `fluxgate_pool_connections` - pool connections by state (idle, checked_out, capacity)
//! - `fluxgate_pool_overflow_connections_total` - connections opened past capacity
//! - `fluxgate_pool_replaced_connections_total` - dead idle connections replaced

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the global Prometheus recorder and describes the fluxgate metrics.
///
/// # Errors
///
/// Returns [`MetricsError::AlreadyInstalled`] if a recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    describe_metrics();

    Ok(MetricsState::new(handle))
}

fn describe_metrics() {
    metrics::describe_counter!(
        "fluxgate_http_requests_total",
        "Total number of HTTP requests"
    );
    metrics::describe_histogram!(
        "fluxgate_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_histogram!(
        "fluxgate_query_duration_seconds",
        "Time-series query duration in seconds, retries included, by outcome"
    );
    metrics::describe_counter!(
        "fluxgate_query_retries_total",
        "Total number of retried time-series queries"
    );
    metrics::describe_counter!(
        "fluxgate_query_failures_total",
        "Total number of time-series queries that failed after retries, by kind"
    );

    metrics::describe_gauge!(
        "fluxgate_pool_connections",
        "Connection pool size by state (idle, checked_out, capacity)"
    );
    metrics::describe_counter!(
        "fluxgate_pool_overflow_connections_total",
        "Connections opened beyond pool capacity after an acquire timeout"
    );
    metrics::describe_counter!(
        "fluxgate_pool_replaced_connections_total",
        "Idle connections replaced after a failed health check"
    );
}

/// Prometheus exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only one global recorder can exist per process, so these tests build
    // local recorders instead of calling init_metrics().

    #[test]
    fn test_metrics_state_renders_recorded_values() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let state = MetricsState::new(recorder.handle());

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("fluxgate_query_retries_total").increment(2);
        });

        let output = state.clone().render();
        assert!(output.contains("fluxgate_query_retries_total 2"));
    }

    #[test]
    fn test_empty_recorder_renders_without_panic() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let _output = MetricsState::new(handle).render();
    }
}
