//! HTTP REST API endpoints.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/api/influxdb_query_api/query/{entity_id}` | GET | Entity history (`start`, `end`) |
//! | `/api/influxdb_query_api/status` | GET | Connection pool status |
//! | `/health` | GET | Liveness probe |
//! | `/ready` | GET | Readiness probe |
//! | `/metrics` | GET | Prometheus metrics (observability router only) |

pub mod routes;
pub mod state;

pub use routes::{
    create_router, create_router_with_body_limit, create_router_with_observability,
    create_router_with_observability_and_limit, error_codes, ApiError, RangeQuery, API_PREFIX,
    DEFAULT_BODY_LIMIT, DEFAULT_RANGE_START, DEFAULT_RANGE_STOP,
};
pub use state::AppState;
