//! fluxgate-api: HTTP API layer
//!
//! This crate provides the HTTP boundary of fluxgate, including:
//! - REST endpoints via Axum
//! - Middleware (request ID, logging, metrics)
//! - Observability (structured logging, Prometheus metrics)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                fluxgate-api                  │
//! ├─────────────────────────────────────────────┤
//! │  http/          - REST endpoints            │
//! │  middleware/    - Request ID, logs, metrics │
//! │  observability/ - Logging and Prometheus    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod http;
pub mod middleware;
pub mod observability;
