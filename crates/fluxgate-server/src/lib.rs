//! fluxgate-server: Configuration and query orchestration
//!
//! This crate ties the domain and storage layers together:
//! - Configuration loading (defaults, YAML file, environment)
//! - QueryService: validate, build and execute one query request
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              fluxgate-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs  - Configuration management      │
//! │  service.rs - Query orchestration           │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod service;

// Re-exports for convenience
pub use config::{ConfigLoadError, InfluxSettings, ServerConfig};
pub use service::{client_factory, ConnectionStatus, QueryService, QueryServiceError};
