//! API middleware.
//!
//! Includes:
//! - Request ID generation and propagation
//! - Request logging
//! - Metrics collection

mod logging;
mod metrics;
mod request_id;

pub use logging::RequestLoggingLayer;
pub use metrics::{MetricsLayer, RequestMetrics};
pub use request_id::{RequestId, RequestIdLayer, REQUEST_ID_HEADER};

use std::sync::Arc;

use axum::Router;

/// Wraps a router in the request middleware.
///
/// The last layer added runs first: request ID, then metrics, then logging.
pub fn apply_request_layers(router: Router, metrics: Arc<RequestMetrics>) -> Router {
    router
        .layer(RequestLoggingLayer::new())
        .layer(MetricsLayer::new(metrics))
        .layer(RequestIdLayer::new())
}
