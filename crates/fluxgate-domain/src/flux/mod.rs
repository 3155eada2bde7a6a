//! Flux query construction.
//!
//! Queries are assembled from one fixed template:
//!
//! ```text
//! from(bucket: "<bucket>") |> range(start: <start>, stop: <stop>) |> filter(fn: (r) => <filter>)
//! ```
//!
//! Every interpolated value is a validated type, and the assembled text is
//! scanned once more by [`check_for_injection`] before it is handed out.

use crate::error::{DomainError, DomainResult, ValidationResult};
use crate::model::{BucketName, BuiltQuery, EntityReference, TimeRange};
use crate::validation::sanitize_identifier;

/// Field compared in the filter when none is given.
pub const DEFAULT_FIELD: &str = "value";

/// Prefix every built query starts with; any other `from(` is a smuggled query.
const BUCKET_SOURCE_PREFIX: &str = "from(bucket:";

/// Substrings that should never appear in a built query (matched lowercase).
const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "import ",
    "buckets(",
    "drop(",
    "delete(",
    "org(",
    "token(",
    "exec(",
    "eval(",
    "system(",
    "javascript:",
    "data:",
    "vbscript:",
    "file:",
    "ftp:",
    "drop table",
    "delete from",
    "insert into",
    "update set",
    "union select",
    "script>",
    "<script",
];

/// Builds the filter expression matching one entity on the default field.
///
/// `domain` and `entity` are interpolated as-is and must already be
/// sanitized; see [`build_safe_filter_with_field`].
pub fn build_safe_filter(domain: &str, entity: &str) -> ValidationResult<String> {
    build_safe_filter_with_field(domain, entity, DEFAULT_FIELD)
}

/// Builds the filter expression matching one entity on `field`.
///
/// Only `field` is sanitized here. Callers MUST pass a pre-sanitized
/// `domain` and `entity` (an [`EntityReference`] from the validator is).
pub fn build_safe_filter_with_field(
    domain: &str,
    entity: &str,
    field: &str,
) -> ValidationResult<String> {
    let safe_field = sanitize_identifier(field)?;
    Ok(format!(
        r#"r["_measurement"] == "{domain}" and r["entity_id"] == "{entity}" and r["_field"] == "{safe_field}""#
    ))
}

/// Assembles the query for one entity over a time range.
///
/// # Errors
///
/// Returns [`DomainError::InjectionDetected`] if the assembled text trips the
/// post-construction scan.
///
/// # Examples
///
/// ```
/// use fluxgate_domain::flux::build_query;
/// use fluxgate_domain::validation::{validate_bucket_name, validate_entity_id, validate_time_range};
///
/// let bucket = validate_bucket_name("homeassistant").unwrap();
/// let entity = validate_entity_id("sensor.temperature").unwrap();
/// let range = validate_time_range("-1h", "now()").unwrap();
///
/// let query = build_query(&bucket, &entity, &range).unwrap();
/// assert!(query.as_str().starts_with(r#"from(bucket: "homeassistant")"#));
/// ```
pub fn build_query(
    bucket: &BucketName,
    entity: &EntityReference,
    range: &TimeRange,
) -> DomainResult<BuiltQuery> {
    let filter = build_safe_filter(entity.domain(), entity.entity())?;
    let query = format!(
        r#"from(bucket: "{bucket}") |> range(start: {start}, stop: {stop}) |> filter(fn: (r) => {filter})"#,
        bucket = bucket.as_str(),
        start = range.start(),
        stop = range.stop(),
    );

    if let Some(pattern) = find_injection_pattern(&query) {
        return Err(DomainError::InjectionDetected {
            pattern: pattern.to_string(),
        });
    }

    Ok(BuiltQuery::new(query))
}

/// Returns `true` if `query` contains a suspicious pattern.
///
/// ```
/// use fluxgate_domain::flux::check_for_injection;
///
/// assert!(!check_for_injection(r#"from(bucket: "x") |> range(start:-1h)"#));
/// assert!(check_for_injection(r#"from(bucket: "x") |> drop()"#));
/// ```
pub fn check_for_injection(query: &str) -> bool {
    find_injection_pattern(query).is_some()
}

/// Returns the first suspicious pattern found in `query`, ignoring case.
pub fn find_injection_pattern(query: &str) -> Option<&'static str> {
    let lower = query.to_lowercase();

    let smuggled_source = lower
        .match_indices("from(")
        .any(|(idx, _)| !lower[idx..].starts_with(BUCKET_SOURCE_PREFIX));
    if smuggled_source {
        return Some("from(");
    }

    SUSPICIOUS_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{validate_bucket_name, validate_entity_id, validate_time_range};

    fn query_for(bucket: &str, entity_id: &str, start: &str, stop: &str) -> DomainResult<BuiltQuery> {
        let bucket = validate_bucket_name(bucket)?;
        let entity = validate_entity_id(entity_id)?;
        let range = validate_time_range(start, stop)?;
        build_query(&bucket, &entity, &range)
    }

    #[test]
    fn test_build_safe_filter_default_field() {
        let filter = build_safe_filter("sensor", "temperature").unwrap();
        assert_eq!(
            filter,
            r#"r["_measurement"] == "sensor" and r["entity_id"] == "temperature" and r["_field"] == "value""#
        );
    }

    #[test]
    fn test_build_safe_filter_sanitizes_field() {
        let filter = build_safe_filter_with_field("sensor", "temperature", "val\"ue").unwrap();
        assert!(filter.ends_with(r#"r["_field"] == "value""#));

        assert!(build_safe_filter_with_field("sensor", "temperature", "\"\"").is_err());
    }

    #[test]
    fn test_build_query_matches_template() {
        let query = query_for("homeassistant", "sensor.temperature", "-1h", "now()").unwrap();
        assert_eq!(
            query.as_str(),
            r#"from(bucket: "homeassistant") |> range(start: -1h, stop: now()) |> filter(fn: (r) => r["_measurement"] == "sensor" and r["entity_id"] == "temperature" and r["_field"] == "value")"#
        );
    }

    #[test]
    fn test_build_query_passes_its_own_scan() {
        let query = query_for("home-assistant", "light.kitchen_1", "-30d", "-1d").unwrap();
        assert!(!check_for_injection(query.as_str()));
    }

    #[test]
    fn test_check_for_injection_allows_bucket_source() {
        assert!(!check_for_injection(r#"from(bucket: "x") |> range(start:-1h)"#));
        assert!(!check_for_injection(r#"FROM(BUCKET: "x") |> range(start:-1h)"#));
    }

    #[test]
    fn test_check_for_injection_flags_second_source() {
        let query = r#"from(bucket: "x") |> range(start: -1h) |> union(tables: [from(host: "y")])"#;
        assert_eq!(find_injection_pattern(query), Some("from("));
    }

    #[test]
    fn test_check_for_injection_flags_keywords() {
        assert!(check_for_injection(r#"from(bucket: "x") |> drop()"#));
        assert!(check_for_injection("import \"sql\""));
        assert!(check_for_injection("x UNION SELECT password"));
        assert!(check_for_injection("<SCRIPT>alert(1)</script>"));
        assert!(check_for_injection("drop table measurements"));
        assert_eq!(find_injection_pattern("secrets.token(\"a\")"), Some("token("));
    }

    #[test]
    fn test_check_for_injection_clean_text() {
        assert!(!check_for_injection("sensor temperature value"));
    }
}
