//! Shared test utilities for fluxgate API tests.

// Each test file uses a different subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use tower::ServiceExt;

use fluxgate_api::http::{create_router, AppState};
use fluxgate_api::middleware::{apply_request_layers, RequestMetrics};
use fluxgate_server::{InfluxSettings, QueryService};
use fluxgate_storage::MemoryClientFactory;

/// Settings for an in-memory backend with a small pool.
pub fn memory_settings(pool_size: usize) -> InfluxSettings {
    InfluxSettings {
        backend: "memory".to_string(),
        pool_size,
        max_retries: 1,
        ..Default::default()
    }
}

/// Full application (routes plus request middleware) over an in-memory backend.
pub fn memory_app(factory: &MemoryClientFactory, metrics: Arc<RequestMetrics>) -> Router {
    let service = QueryService::new(&memory_settings(2), Arc::new(factory.clone()));
    apply_request_layers(create_router(AppState::new(service)), metrics)
}

/// Sends a GET and returns the status, the `x-request-id` header and the JSON body.
pub async fn get_json(
    app: Router,
    uri: &str,
) -> (StatusCode, Option<String>, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, request_id, json)
}

/// Binds `router` on an ephemeral local port and serves it in the background.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A minimal InfluxDB v2 stand-in answering `/ping` and `/api/v2/query`.
#[derive(Clone)]
pub struct InfluxStub {
    pub addr: SocketAddr,
    queries: Arc<Mutex<Vec<String>>>,
}

impl InfluxStub {
    /// Starts a stub that answers every query with `status` and `body`.
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&queries);

        let router = Router::new()
            .route("/ping", get(|| async { StatusCode::NO_CONTENT }))
            .route(
                "/api/v2/query",
                post(move |query: String| {
                    let recorded = Arc::clone(&recorded);
                    async move {
                        recorded.lock().unwrap().push(query);
                        (status, body)
                    }
                }),
            );

        let addr = serve(router).await;
        Self { addr, queries }
    }

    /// Flux queries received so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Settings pointing the real InfluxDB client at this stub.
    pub fn settings(&self) -> InfluxSettings {
        InfluxSettings {
            backend: "influxdb".to_string(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            token: "test-token".to_string(),
            organization: "home".to_string(),
            pool_size: 2,
            max_retries: 1,
            timeout: 2_000,
            ..Default::default()
        }
    }
}

/// One table with a single reading, as InfluxDB renders it.
pub const SINGLE_READING_CSV: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string\n\
#group,false,false,true,true,false,false,true,true,true\n\
#default,_result,,,,,,,,\n\
,result,table,_start,_stop,_time,_value,_field,_measurement,entity_id\n\
,,0,2024-05-01T07:00:00Z,2024-05-01T08:00:00Z,2024-05-01T08:00:00Z,23.7,value,sensor,living_room_temperature\n\
\n";
