//! Query orchestration.
//!
//! [`QueryService`] is built once at startup and shared by every request:
//! validate → build → execute through the pool. The pool inside is
//! initialized lazily on first use and torn down by [`QueryService::cleanup`].

use std::sync::Arc;

use fluxgate_domain::flux::build_query;
use fluxgate_domain::validation::validate_query_parameters;
use fluxgate_domain::{DomainError, ValidationError};
use fluxgate_storage::{
    ClientFactory, ConnectionPool, DataPoint, InfluxClientFactory, MemoryClientFactory,
    PoolStatus, StorageError,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigLoadError, InfluxSettings};

/// Errors returned by [`QueryService::run_query`].
#[derive(Debug, thiserror::Error)]
pub enum QueryServiceError {
    /// Rejected input, including injection detected after query construction.
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] DomainError),

    /// The backend failed; the original cause is kept for logging.
    #[error("query execution failed: {0}")]
    QueryExecutionFailed(#[from] StorageError),
}

impl QueryServiceError {
    /// Whether the caller is at fault (maps to a 4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }
}

impl From<ValidationError> for QueryServiceError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationFailed(DomainError::Validation(err))
    }
}

/// Pool state as reported to monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    NotInitialized,
    Initialized(PoolStatus),
}

/// Builds the client factory selected by `influxdb.backend`.
pub fn client_factory(settings: &InfluxSettings) -> Result<Arc<dyn ClientFactory>, ConfigLoadError> {
    match settings.backend.as_str() {
        "influxdb" => Ok(Arc::new(InfluxClientFactory::new(settings.connection_config()))),
        "memory" => Ok(Arc::new(MemoryClientFactory::new())),
        other => Err(ConfigLoadError::Invalid {
            message: format!("unknown influxdb.backend: {other}"),
        }),
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::Empty {
        field: field.to_string(),
    })
}

/// Shared context for query execution.
#[derive(Debug, Clone)]
pub struct QueryService {
    bucket: String,
    pool: ConnectionPool,
}

impl QueryService {
    /// Creates the service. No connection is opened until first use.
    pub fn new(settings: &InfluxSettings, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            bucket: settings.bucket.clone(),
            pool: ConnectionPool::new(settings.pool_config(), factory),
        }
    }

    /// Creates the service with the factory selected by the settings.
    pub fn from_settings(settings: &InfluxSettings) -> Result<Self, ConfigLoadError> {
        Ok(Self::new(settings, client_factory(settings)?))
    }

    /// Validates the request, builds the query and runs it.
    ///
    /// Invalid input never reaches the backend. An empty result is `Ok(vec![])`.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn run_query(
        &self,
        entity_id: &str,
        range_start: &str,
        range_stop: &str,
    ) -> Result<Vec<DataPoint>, QueryServiceError> {
        let mut params = Map::new();
        params.insert("entity_id".to_string(), Value::from(entity_id));
        params.insert("bucket".to_string(), Value::from(self.bucket.as_str()));
        params.insert("range_start".to_string(), Value::from(range_start));
        params.insert("range_stop".to_string(), Value::from(range_stop));

        let validated = validate_query_parameters(&params).map_err(|err| {
            warn!(error = %err, "rejected query parameters");
            err
        })?;

        let entity = required(validated.entity(), "entity_id")?;
        let bucket = required(validated.bucket(), "bucket")?;
        let range = required(validated.time_range(), "time range")?;

        let query = build_query(bucket, entity, range).map_err(|err| {
            warn!(error = %err, "rejected built query");
            err
        })?;
        debug!(query = %query, "built query");

        let points = self.pool.execute_query(query.as_str()).await?;
        debug!(records = points.len(), "query returned");
        Ok(points)
    }

    /// Initializes the pool if needed.
    pub async fn ensure_ready(&self) {
        self.pool.ensure_ready().await;
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let status = self.pool.status();
        if status.ready {
            ConnectionStatus::Initialized(status)
        } else {
            ConnectionStatus::NotInitialized
        }
    }

    /// Shuts the pool down. The service re-initializes on next use.
    pub async fn cleanup(&self) {
        info!("closing time-series connections");
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fluxgate_storage::{ClientError, FluxRecord, FluxTable};

    fn settings() -> InfluxSettings {
        InfluxSettings {
            backend: "memory".to_string(),
            pool_size: 2,
            max_retries: 2,
            ..Default::default()
        }
    }

    fn service_with(factory: &MemoryClientFactory) -> QueryService {
        QueryService::new(&settings(), Arc::new(factory.clone()))
    }

    #[tokio::test]
    async fn test_run_query_returns_normalized_records() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let factory = MemoryClientFactory::with_tables(vec![FluxTable::new(vec![
            FluxRecord::new(time, 23.7),
        ])]);
        let service = service_with(&factory);

        let points = service
            .run_query("sensor.living_room_temperature", "-1h", "now()")
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&points).unwrap(),
            serde_json::json!([{"time": "2024-05-01T08:00:00+00:00", "value": 23.7}])
        );
        assert_eq!(
            factory.last_query().unwrap(),
            r#"from(bucket: "homeassistant") |> range(start: -1h, stop: now()) |> filter(fn: (r) => r["_measurement"] == "sensor" and r["entity_id"] == "living_room_temperature" and r["_field"] == "value")"#
        );
    }

    #[tokio::test]
    async fn test_run_query_empty_result() {
        let factory = MemoryClientFactory::new();
        let service = service_with(&factory);

        let points = service.run_query("light.kitchen", "-1d", "now()").await.unwrap();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn test_injection_never_reaches_backend() {
        let factory = MemoryClientFactory::new();
        let service = service_with(&factory);

        let err = service
            .run_query("sensor.temperature'; DROP TABLE measurements; --", "-1h", "now()")
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(matches!(
            err,
            QueryServiceError::ValidationFailed(DomainError::Validation(
                ValidationError::InvalidEntity { .. }
            ))
        ));
        assert_eq!(factory.queries(), 0);
        assert_eq!(factory.connects(), 0);
    }

    #[tokio::test]
    async fn test_dangerous_time_range_is_rejected() {
        let factory = MemoryClientFactory::new();
        let service = service_with(&factory);

        let err = service
            .run_query("sensor.temperature", "-1h", "now() |> drop(columns: [\"x\"])")
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(err.to_string().contains("drop("));
        assert_eq!(factory.queries(), 0);
    }

    #[tokio::test]
    async fn test_invalid_bucket_setting_is_a_validation_failure() {
        let factory = MemoryClientFactory::new();
        let settings = InfluxSettings {
            bucket: "bad bucket".to_string(),
            ..settings()
        };
        let service = QueryService::new(&settings, Arc::new(factory.clone()));

        let err = service.run_query("sensor.temperature", "-1h", "now()").await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_is_execution_failure() {
        let factory = MemoryClientFactory::new();
        factory.fail_all_queries(ClientError::backend("HTTP 503: unavailable"));
        let service = service_with(&factory);

        let err = service.run_query("sensor.temperature", "-1h", "now()").await.unwrap_err();
        assert!(!err.is_client_error());
        assert!(matches!(
            err,
            QueryServiceError::QueryExecutionFailed(StorageError::QueryFailed { attempts: 3, .. })
        ));
        assert_eq!(factory.queries(), 3);
    }

    #[tokio::test]
    async fn test_connection_status_lifecycle() {
        let factory = MemoryClientFactory::new();
        let service = service_with(&factory);
        assert_eq!(service.connection_status(), ConnectionStatus::NotInitialized);

        service.ensure_ready().await;
        match service.connection_status() {
            ConnectionStatus::Initialized(status) => {
                assert_eq!(status.idle_count, 2);
                assert_eq!(status.endpoint_label, "memory");
            }
            other => panic!("unexpected status: {other:?}"),
        }

        service.cleanup().await;
        assert_eq!(service.connection_status(), ConnectionStatus::NotInitialized);
        assert_eq!(factory.closes(), 2);
    }

    #[test]
    fn test_connection_status_serialization() {
        let json = serde_json::to_value(ConnectionStatus::NotInitialized).unwrap();
        assert_eq!(json, serde_json::json!({"status": "not_initialized"}));

        let json = serde_json::to_value(ConnectionStatus::Initialized(PoolStatus {
            capacity: 5,
            idle_count: 4,
            checked_out_count: 1,
            ready: true,
            endpoint_label: "localhost:8086".to_string(),
        }))
        .unwrap();
        assert_eq!(json["status"], "initialized");
        assert_eq!(json["idle_count"], 4);
    }

    #[test]
    fn test_client_factory_selection() {
        let factory = client_factory(&settings()).unwrap();
        assert_eq!(factory.endpoint_label(), "memory");

        let influx = InfluxSettings::default();
        assert_eq!(client_factory(&influx).unwrap().endpoint_label(), "localhost:8086");

        let unknown = InfluxSettings {
            backend: "sqlite".to_string(),
            ..Default::default()
        };
        assert!(client_factory(&unknown).is_err());
    }
}
