//! Domain error types for input validation and query construction.

use thiserror::Error;

/// Reasons an untrusted input field was rejected.
///
/// Every variant names the offending field, value or pattern so that a
/// rejection can be diagnosed from the log line alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A field that must be textual was not a string.
    #[error("{field} must be a string")]
    NotString { field: String },

    /// A field was empty (or whitespace only).
    #[error("{field} cannot be empty")]
    Empty { field: String },

    /// The entity id has no `domain.entity` separator.
    #[error("invalid entity_id '{value}': must contain '.' separator (format: domain.entity)")]
    InvalidFormat { value: String },

    /// The domain part of an entity id is empty, too long or has illegal characters.
    #[error("invalid domain in entity_id '{value}': {reason}")]
    InvalidDomain { value: String, reason: String },

    /// The entity part of an entity id is empty, too long or has illegal characters.
    #[error("invalid entity in entity_id '{value}': {reason}")]
    InvalidEntity { value: String, reason: String },

    /// Stripping dangerous characters left nothing behind.
    #[error("{field} became empty after sanitization")]
    EmptyAfterSanitization { field: String },

    /// A value exceeds its length limit.
    #[error("{field} too long (max {max} characters)")]
    TooLong { field: String, max: usize },

    /// A value contains characters outside its allowed class.
    #[error("invalid {field} '{value}': only alphanumeric characters, underscores and hyphens allowed")]
    InvalidCharacters { field: String, value: String },

    /// A time expression contains a denylisted keyword.
    #[error("potentially dangerous pattern detected in time range: {pattern}")]
    DangerousPattern { pattern: String },
}

/// Errors raised by the domain layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An input field failed validation.
    #[error("input validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A fully built query tripped the post-construction injection scan.
    #[error("potentially dangerous query detected after construction (matched '{pattern}')")]
    InjectionDetected { pattern: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
