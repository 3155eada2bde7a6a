//! Input validation and sanitization.
//!
//! Pure functions that check and normalize each untrusted request field
//! before it is interpolated into a Flux query. No I/O, no shared state.
//!
//! Two policies are in play:
//! - Identifiers (measurement, entity id, field) are character-stripped:
//!   the positions they occupy in the query template accept no escaping.
//! - Time expressions are passed through verbatim and only scanned against
//!   a keyword denylist, because legitimate Flux time syntax uses
//!   parentheses and operators. This is a weaker guarantee than the
//!   identifier path.

use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationResult};
use crate::model::{
    BucketName, EntityReference, SanitizedIdentifier, TimeRange, ValidatedParams,
};

/// Maximum length of the domain part of an entity id.
pub const MAX_DOMAIN_LENGTH: usize = 50;

/// Maximum length of the entity part of an entity id.
pub const MAX_ENTITY_LENGTH: usize = 100;

/// Maximum length of a sanitized identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 100;

/// Maximum length of a bucket name.
pub const MAX_BUCKET_LENGTH: usize = 100;

/// Characters removed from identifiers.
pub const DANGEROUS_CHARS: &[char] = &[
    '"', '\'', '`', '\\', ';', '|', '>', '<', '&', '$', '(', ')', '[', ']', '{', '}', '\n', '\r',
    '\t',
];

/// Substrings rejected (case-insensitively) in time expressions.
pub const TIME_RANGE_DENYLIST: &[&str] = &[
    "import",
    "from(",
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
    "http:",
    "https:",
];

/// Parameter keys with a dedicated validator.
const ENTITY_ID_KEY: &str = "entity_id";
const BUCKET_KEY: &str = "bucket";
const RANGE_START_KEY: &str = "range_start";
const RANGE_STOP_KEY: &str = "range_stop";

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_bucket_char(c: char) -> bool {
    is_identifier_char(c) || c == '-'
}

/// Checks one part of an entity id and returns the rejection reason, if any.
fn entity_part_problem(part: &str, max: usize) -> Option<String> {
    if part.is_empty() {
        return Some("cannot be empty".to_string());
    }
    if !part.chars().all(is_identifier_char) {
        return Some("only alphanumeric characters and underscores allowed".to_string());
    }
    if part.chars().count() > max {
        return Some(format!("too long (max {max} characters)"));
    }
    None
}

/// Validates an entity id and splits it into domain and entity.
///
/// Only the first `.` separates the parts, so the domain can never contain
/// a dot; a dot in the remainder fails the entity character check.
///
/// # Examples
///
/// ```
/// use fluxgate_domain::validation::validate_entity_id;
///
/// let entity = validate_entity_id("sensor.living_room_temperature").unwrap();
/// assert_eq!(entity.domain(), "sensor");
/// assert_eq!(entity.entity(), "living_room_temperature");
///
/// assert!(validate_entity_id("sensor").is_err());
/// assert!(validate_entity_id("sensor.temp'; DROP").is_err());
/// ```
pub fn validate_entity_id(raw: &str) -> ValidationResult<EntityReference> {
    if raw.is_empty() {
        return Err(ValidationError::Empty {
            field: ENTITY_ID_KEY.to_string(),
        });
    }

    let (domain, entity) = raw
        .split_once('.')
        .ok_or_else(|| ValidationError::InvalidFormat {
            value: raw.to_string(),
        })?;

    if let Some(reason) = entity_part_problem(domain, MAX_DOMAIN_LENGTH) {
        return Err(ValidationError::InvalidDomain {
            value: domain.to_string(),
            reason,
        });
    }

    if let Some(reason) = entity_part_problem(entity, MAX_ENTITY_LENGTH) {
        return Err(ValidationError::InvalidEntity {
            value: entity.to_string(),
            reason,
        });
    }

    Ok(EntityReference::new(domain, entity))
}

/// Strips dangerous characters from an identifier.
///
/// This is a denylist strip, not an escape: structural characters are
/// removed outright. Surrounding whitespace is trimmed before and after
/// stripping.
///
/// # Examples
///
/// ```
/// use fluxgate_domain::validation::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("temp\"; drop").unwrap().as_str(), "temp drop");
/// assert!(sanitize_identifier(";;;").is_err());
/// ```
pub fn sanitize_identifier(raw: &str) -> ValidationResult<SanitizedIdentifier> {
    sanitize_field("identifier", raw)
}

/// Like [`sanitize_identifier`], for a value that may not be textual.
pub fn sanitize_identifier_value(value: &Value) -> ValidationResult<SanitizedIdentifier> {
    sanitize_field("identifier", as_text("identifier", value)?)
}

fn sanitize_field(field: &str, raw: &str) -> ValidationResult<SanitizedIdentifier> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty {
            field: field.to_string(),
        });
    }

    let stripped: String = trimmed
        .chars()
        .filter(|c| !DANGEROUS_CHARS.contains(c))
        .collect();
    let sanitized = stripped.trim();

    if sanitized.is_empty() {
        return Err(ValidationError::EmptyAfterSanitization {
            field: field.to_string(),
        });
    }

    if sanitized.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LENGTH,
        });
    }

    Ok(SanitizedIdentifier::new(sanitized))
}

/// Validates a bucket name against `[A-Za-z0-9_-]{1,100}`.
pub fn validate_bucket_name(raw: &str) -> ValidationResult<BucketName> {
    if raw.is_empty() {
        return Err(ValidationError::Empty {
            field: BUCKET_KEY.to_string(),
        });
    }

    if !raw.chars().all(is_bucket_char) {
        return Err(ValidationError::InvalidCharacters {
            field: BUCKET_KEY.to_string(),
            value: raw.to_string(),
        });
    }

    if raw.chars().count() > MAX_BUCKET_LENGTH {
        return Err(ValidationError::TooLong {
            field: BUCKET_KEY.to_string(),
            max: MAX_BUCKET_LENGTH,
        });
    }

    Ok(BucketName::new(raw))
}

/// Returns the first denylisted keyword found in `expr`, ignoring case.
fn find_dangerous_keyword(expr: &str) -> Option<&'static str> {
    let lower = expr.to_lowercase();
    TIME_RANGE_DENYLIST
        .iter()
        .copied()
        .find(|keyword| lower.contains(keyword))
}

/// Validates a pair of Flux time expressions.
///
/// # Examples
///
/// ```
/// use fluxgate_domain::validation::validate_time_range;
///
/// assert!(validate_time_range("-1h", "now()").is_ok());
/// assert!(validate_time_range("-1h", "EXEC(rm)").is_err());
/// ```
pub fn validate_time_range(start: &str, stop: &str) -> ValidationResult<TimeRange> {
    if start.is_empty() || stop.is_empty() {
        return Err(ValidationError::Empty {
            field: "time range".to_string(),
        });
    }

    for expr in [start, stop] {
        if let Some(keyword) = find_dangerous_keyword(expr) {
            return Err(ValidationError::DangerousPattern {
                pattern: keyword.to_string(),
            });
        }
    }

    Ok(TimeRange::new(start, stop))
}

/// Escapes a free-form string value.
///
/// Quotes and backslashes get a backslash prefix; newline, carriage return
/// and tab become `\n`, `\r` and `\t`.
pub fn escape_value(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn as_text<'a>(field: &str, value: &'a Value) -> ValidationResult<&'a str> {
    value.as_str().ok_or_else(|| ValidationError::NotString {
        field: field.to_string(),
    })
}

/// Validates a whole parameter map in one call.
///
/// Recognized keys (`entity_id`, `bucket`, and the `range_start` /
/// `range_stop` pair) go through their dedicated validators; the entity
/// parts are additionally sanitized. Every other string field is escaped
/// with [`escape_value`], non-string fields pass through unchanged.
///
/// Fails on the first rejected field; errors are not aggregated.
pub fn validate_query_parameters(params: &Map<String, Value>) -> ValidationResult<ValidatedParams> {
    let mut validated = ValidatedParams::default();

    if let Some(raw) = params.get(ENTITY_ID_KEY) {
        let entity = validate_entity_id(as_text(ENTITY_ID_KEY, raw)?)?;
        let domain = sanitize_field("domain", entity.domain())?;
        let name = sanitize_field("entity", entity.entity())?;
        validated.entity = Some(EntityReference::new(domain.into_inner(), name.into_inner()));
    }

    if let Some(raw) = params.get(BUCKET_KEY) {
        validated.bucket = Some(validate_bucket_name(as_text(BUCKET_KEY, raw)?)?);
    }

    if let (Some(start), Some(stop)) = (params.get(RANGE_START_KEY), params.get(RANGE_STOP_KEY)) {
        validated.time_range = Some(validate_time_range(
            as_text(RANGE_START_KEY, start)?,
            as_text(RANGE_STOP_KEY, stop)?,
        )?);
    }

    let entity_validated = validated.entity.is_some();
    for (key, value) in params {
        let already_validated = matches!(
            key.as_str(),
            ENTITY_ID_KEY | BUCKET_KEY | RANGE_START_KEY | RANGE_STOP_KEY
        ) || (entity_validated && matches!(key.as_str(), "domain" | "entity"));
        if already_validated {
            continue;
        }

        let kept = match value {
            Value::String(s) => Value::String(escape_value(s)),
            other => other.clone(),
        };
        validated.extras.insert(key.clone(), kept);
    }

    Ok(validated)
}
