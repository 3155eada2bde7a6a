//! fluxgate-storage: Backend clients and connection pooling
//!
//! This crate provides the time-series backend side of fluxgate, including:
//! - TimeSeriesClient / ClientFactory traits
//! - InfluxDB v2 HTTP client (annotated CSV decoding)
//! - In-memory client for testing and local runs
//! - Bounded connection pool with health checks and query retry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              fluxgate-storage                │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs - Client and factory traits      │
//! │  influx.rs - InfluxDB HTTP implementation   │
//! │  memory.rs - In-memory implementation       │
//! │  pool.rs   - Connection pool and retry      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod influx;
pub mod memory;
pub mod pool;
pub mod traits;

// Re-export commonly used types
pub use error::{is_retryable_message, ClientError, ClientResult, StorageError, StorageResult};
pub use influx::{InfluxClient, InfluxClientFactory, InfluxConnectionConfig};
pub use memory::{MemoryClient, MemoryClientFactory};
pub use pool::{retry_delay, ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use traits::{ClientFactory, DataPoint, FluxRecord, FluxTable, TimeSeriesClient};
