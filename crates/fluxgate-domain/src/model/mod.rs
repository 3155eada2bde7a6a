//! Validated value types.
//!
//! This module contains:
//! - Entity references parsed from `domain.entity` identifiers
//! - Bucket names, time ranges and sanitized identifiers
//! - The built query and the aggregate of validated parameters

mod types;
#[cfg(test)]
mod types_proptest;

pub use types::*;
