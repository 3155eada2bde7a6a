//! InfluxDB v2 HTTP client.
//!
//! Queries go to `POST /api/v2/query` as raw Flux; results come back as
//! annotated CSV and are decoded into [`FluxTable`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{ClientError, ClientResult};
use crate::traits::{ClientFactory, FluxRecord, FluxTable, TimeSeriesClient};

const FLUX_CONTENT_TYPE: &str = "application/vnd.flux";
const CSV_ACCEPT: &str = "application/csv";

/// Maximum number of response body bytes quoted in an error message.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Connection settings for an InfluxDB server.
#[derive(Clone)]
pub struct InfluxConnectionConfig {
    pub host: String,
    pub port: u16,
    /// API token, sent as `Authorization: Token <token>`.
    pub token: String,
    pub organization: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Use `https`.
    pub ssl: bool,
    /// Verify the server certificate when `ssl` is on.
    pub verify_ssl: bool,
}

// Custom Debug implementation to hide the token
impl std::fmt::Debug for InfluxConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"[REDACTED]")
            .field("organization", &self.organization)
            .field("timeout", &self.timeout)
            .field("ssl", &self.ssl)
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

impl Default for InfluxConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            token: String::new(),
            organization: String::new(),
            timeout: Duration::from_millis(10_000),
            ssl: false,
            verify_ssl: true,
        }
    }
}

impl InfluxConnectionConfig {
    /// Base URL of the server, e.g. `http://localhost:8086`.
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Opens [`InfluxClient`] sessions.
#[derive(Debug, Clone)]
pub struct InfluxClientFactory {
    config: Arc<InfluxConnectionConfig>,
}

impl InfluxClientFactory {
    pub fn new(config: InfluxConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ClientFactory for InfluxClientFactory {
    async fn connect(&self) -> ClientResult<Arc<dyn TimeSeriesClient>> {
        let client = InfluxClient::new(Arc::clone(&self.config))?;
        Ok(Arc::new(client))
    }

    fn endpoint_label(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// One HTTP session with an InfluxDB server.
pub struct InfluxClient {
    http: reqwest::Client,
    config: Arc<InfluxConnectionConfig>,
    base_url: String,
    closed: AtomicBool,
}

impl InfluxClient {
    pub fn new(config: Arc<InfluxConnectionConfig>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.ssl && !config.verify_ssl)
            .build()
            .map_err(|e| ClientError::unexpected(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::unexpected("client is closed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InfluxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxClient")
            .field("base_url", &self.base_url)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Maps a transport error to a backend error whose message the retry
/// classifier recognizes.
fn transport_error(err: reqwest::Error) -> ClientError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection error"
    } else {
        "network error"
    };
    ClientError::backend(format!("{kind}: {err}"))
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl TimeSeriesClient for InfluxClient {
    async fn ping(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        match self.http.get(format!("{}/ping", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, base_url = %self.base_url, "ping failed");
                false
            }
        }
    }

    #[instrument(skip(self, query), fields(base_url = %self.base_url))]
    async fn query(&self, query: &str) -> ClientResult<Vec<FluxTable>> {
        self.ensure_open()?;

        let response = self
            .http
            .post(format!("{}/api/v2/query", self.base_url))
            .query(&[("org", self.config.organization.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .header(CONTENT_TYPE, FLUX_CONTENT_TYPE)
            .header(ACCEPT, CSV_ACCEPT)
            .body(query.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ClientError::backend(format!(
                "HTTP {status}: {}",
                truncate_body(body.trim())
            )));
        }

        parse_annotated_csv(&body)
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ResultHeader {
    table: Option<usize>,
    time: usize,
    value: usize,
    /// `#datatype` annotation of the `_value` column, when present.
    value_type: Option<String>,
}

/// Guesses the most specific JSON scalar for an unannotated `_value` cell.
fn infer_value(cell: &str) -> Value {
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = cell.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

fn mismatched(cell: &str, datatype: &str) -> ClientError {
    ClientError::unexpected(format!("invalid {datatype} value {cell:?}"))
}

/// Converts a `_value` cell according to its `#datatype` annotation.
///
/// Empty cells are null. Non-finite doubles become null since JSON cannot
/// carry them. Types without a scalar counterpart (`dateTime:RFC3339`,
/// `duration`, `base64Binary`) are kept as strings.
fn parse_value(cell: &str, datatype: Option<&str>) -> ClientResult<Value> {
    if cell.is_empty() {
        return Ok(Value::Null);
    }
    let Some(datatype) = datatype else {
        return Ok(infer_value(cell));
    };

    match datatype {
        "long" => cell
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatched(cell, datatype)),
        "unsignedLong" => cell
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| mismatched(cell, datatype)),
        "double" => cell
            .parse::<f64>()
            .map(|float| {
                serde_json::Number::from_f64(float)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
            .map_err(|_| mismatched(cell, datatype)),
        "boolean" => match cell {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatched(cell, datatype)),
        },
        _ => Ok(Value::String(cell.to_string())),
    }
}

fn parse_time(cell: &str) -> ClientResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(cell)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| ClientError::unexpected(format!("invalid _time value {cell:?}: {e}")))
}

/// Decodes an annotated CSV query response.
///
/// A response is a sequence of blocks separated by blank lines. Each block
/// opens with annotation rows (`#datatype`, `#group`, `#default`), then one
/// header row, then data rows grouped into tables by their `table` column.
/// Only the first row after the annotations is read as a header, so data
/// cells never change the block's shape. A header with an `error` column
/// and no `_time`/`_value` means the next row carries an error reported by
/// the server.
pub fn parse_annotated_csv(body: &str) -> ClientResult<Vec<FluxTable>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut tables: Vec<FluxTable> = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut awaiting_header = true;
    let mut header: Option<ResultHeader> = None;
    let mut error_column: Option<usize> = None;
    let mut current_table: Option<String> = None;

    for row in reader.records() {
        let row = row.map_err(|e| ClientError::unexpected(format!("malformed CSV response: {e}")))?;

        if row.iter().all(str::is_empty) {
            header = None;
            datatypes.clear();
            awaiting_header = true;
            continue;
        }
        if let Some(annotation) = row.get(0).filter(|cell| cell.starts_with('#')) {
            if annotation == "#datatype" {
                datatypes = row.iter().map(str::to_string).collect();
            }
            awaiting_header = true;
            continue;
        }

        if let Some(column) = error_column {
            let message = row.get(column).unwrap_or_default();
            return Err(ClientError::backend(format!("query error: {message}")));
        }

        if awaiting_header {
            awaiting_header = false;
            current_table = None;
            let position = |name: &str| row.iter().position(|cell| cell == name);
            header = match (position("_time"), position("_value")) {
                (Some(time), Some(value)) => Some(ResultHeader {
                    table: position("table"),
                    time,
                    value,
                    value_type: datatypes.get(value).cloned(),
                }),
                _ => {
                    error_column = position("error");
                    None
                }
            };
            continue;
        }

        let Some(columns) = header.as_ref() else {
            continue;
        };

        let table_id = columns
            .table
            .and_then(|idx| row.get(idx))
            .unwrap_or_default();
        if current_table.as_deref() != Some(table_id) {
            tables.push(FluxTable::default());
            current_table = Some(table_id.to_string());
        }

        let time = parse_time(row.get(columns.time).unwrap_or_default())?;
        let value = parse_value(
            row.get(columns.value).unwrap_or_default(),
            columns.value_type.as_deref(),
        )?;
        if let Some(table) = tables.last_mut() {
            table.records.push(FluxRecord { time, value });
        }
    }

    Ok(tables)
}
