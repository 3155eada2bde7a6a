//! fluxgate-domain: Input validation and safe query construction
//!
//! This crate turns untrusted request fields into values that are safe to
//! interpolate into a Flux query:
//! - Validated value types (entity reference, bucket, time range)
//! - Field validators and the identifier sanitizer
//! - The fixed-template query builder with a post-construction injection scan
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              fluxgate-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  model/      - Validated value types        │
//! │  validation/ - Field validators, sanitizer  │
//! │  flux/       - Query builder, injection scan│
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod flux;
pub mod model;
pub mod validation;

// Re-export commonly used types at the crate root
pub use error::{DomainError, DomainResult, ValidationError, ValidationResult};
pub use model::{BucketName, BuiltQuery, EntityReference, SanitizedIdentifier, TimeRange, ValidatedParams};
