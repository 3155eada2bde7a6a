//! Backend client traits and the records they return.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientResult;

/// One row of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    pub time: DateTime<Utc>,
    pub value: Value,
}

impl FluxRecord {
    pub fn new(time: DateTime<Utc>, value: impl Into<Value>) -> Self {
        Self {
            time,
            value: value.into(),
        }
    }
}

/// One table of a query result; records keep backend order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxTable {
    pub records: Vec<FluxRecord>,
}

impl FluxTable {
    pub fn new(records: Vec<FluxRecord>) -> Self {
        Self { records }
    }
}

/// A normalized record as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// RFC 3339 timestamp.
    pub time: String,
    /// Backend-native scalar.
    pub value: Value,
}

impl From<&FluxRecord> for DataPoint {
    fn from(record: &FluxRecord) -> Self {
        Self {
            time: record.time.to_rfc3339(),
            value: record.value.clone(),
        }
    }
}

/// A live session with a time-series backend.
///
/// Implementations must be thread-safe (Send + Sync); the pool hands a
/// client to at most one request at a time.
#[async_trait]
pub trait TimeSeriesClient: Send + Sync + 'static {
    /// Liveness check. Returns `true` if the session is usable.
    async fn ping(&self) -> bool;

    /// Runs a query and returns its tables in backend order.
    async fn query(&self, query: &str) -> ClientResult<Vec<FluxTable>>;

    /// Closes the session.
    async fn close(&self) -> ClientResult<()>;
}

/// Opens new client sessions for the pool.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    /// Opens a new session.
    async fn connect(&self) -> ClientResult<Arc<dyn TimeSeriesClient>>;

    /// Human-readable endpoint, e.g. `localhost:8086`.
    fn endpoint_label(&self) -> String;
}
