//! Validated value types.
//!
//! Values of these types can only be produced by the validator and the query
//! builder, so holding one is proof that the corresponding checks ran.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A parsed `domain.entity` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityReference {
    domain: String,
    entity: String,
}

impl EntityReference {
    pub(crate) fn new(domain: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            entity: entity.into(),
        }
    }

    /// Returns the domain part (e.g. "sensor").
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the entity part (e.g. "living_room_temperature").
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.entity)
    }
}

/// A bucket name restricted to `[A-Za-z0-9_-]`, at most 100 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BucketName(String);

impl BucketName {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the bucket name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pair of Flux time expressions that passed the denylist scan.
///
/// The expressions are kept verbatim: legitimate Flux time syntax uses
/// parentheses and operators, so they cannot be character-stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    start: String,
    stop: String,
}

impl TimeRange {
    pub(crate) fn new(start: impl Into<String>, stop: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }

    /// Returns the range start expression (e.g. "-1h").
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Returns the range stop expression (e.g. "now()").
    pub fn stop(&self) -> &str {
        &self.stop
    }
}

/// An identifier with every dangerous character removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SanitizedIdentifier(String);

impl SanitizedIdentifier {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SanitizedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Flux query assembled from the fixed range + filter template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery(String);

impl BuiltQuery {
    pub(crate) fn new(value: String) -> Self {
        Self(value)
    }

    /// Returns the query text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuiltQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The aggregate produced by validating a full parameter map.
///
/// Recognized keys are validated into their typed form. Any other string
/// field is escaped and kept in `extras`; non-string extras pass through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams {
    pub(crate) entity: Option<EntityReference>,
    pub(crate) bucket: Option<BucketName>,
    pub(crate) time_range: Option<TimeRange>,
    pub(crate) extras: BTreeMap<String, serde_json::Value>,
}

impl ValidatedParams {
    /// The sanitized entity reference, if `entity_id` was supplied.
    pub fn entity(&self) -> Option<&EntityReference> {
        self.entity.as_ref()
    }

    /// The validated bucket, if `bucket` was supplied.
    pub fn bucket(&self) -> Option<&BucketName> {
        self.bucket.as_ref()
    }

    /// The validated time range, if both `range_start` and `range_stop` were supplied.
    pub fn time_range(&self) -> Option<&TimeRange> {
        self.time_range.as_ref()
    }

    /// Unrecognized fields, escaped when textual.
    pub fn extras(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extras
    }
}
