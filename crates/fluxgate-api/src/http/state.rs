//! Application state for HTTP handlers.

use fluxgate_server::QueryService;

/// Application state shared across all HTTP handlers.
///
/// The [`QueryService`] is cheap to clone; every clone drives the same
/// connection pool, so handlers never create connections of their own.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Validation, query building and pooled execution.
    pub service: QueryService,
}

impl AppState {
    /// Creates a new application state around a query service.
    pub fn new(service: QueryService) -> Self {
        Self { service }
    }
}
