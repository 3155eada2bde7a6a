//! Property-based tests for the validated types and their validators.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::error::ValidationError;
    use crate::flux::{build_query, check_for_injection};
    use crate::validation::{
        sanitize_identifier, validate_bucket_name, validate_entity_id, validate_time_range,
        DANGEROUS_CHARS, TIME_RANGE_DENYLIST,
    };

    /// Dangerous characters that survive `trim`.
    fn visible_dangerous_char() -> impl Strategy<Value = char> {
        let visible: Vec<char> = DANGEROUS_CHARS
            .iter()
            .copied()
            .filter(|c| !c.is_whitespace())
            .collect();
        prop::sample::select(visible)
    }

    fn denylisted_keyword() -> impl Strategy<Value = &'static str> {
        prop::sample::select(TIME_RANGE_DENYLIST.to_vec())
    }

    /// Flips the case of characters according to `mask`.
    fn mix_case(keyword: &str, mask: &[bool]) -> String {
        keyword
            .chars()
            .zip(mask.iter().cycle())
            .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c })
            .collect()
    }

    proptest! {
        #[test]
        fn test_only_dangerous_chars_sanitize_to_nothing(
            chars in prop::collection::vec(visible_dangerous_char(), 1..30)
        ) {
            let raw: String = chars.into_iter().collect();
            let result = sanitize_identifier(&raw);
            let is_empty_after_sanitization =
                matches!(result, Err(ValidationError::EmptyAfterSanitization { .. }));
            prop_assert!(is_empty_after_sanitization, "accepted: {:?}", raw);
        }

        #[test]
        fn test_valid_entity_id_roundtrip(
            domain in "[a-z][a-z0-9_]{0,49}",
            entity in "[A-Za-z0-9_]{1,100}"
        ) {
            let raw = format!("{domain}.{entity}");
            let parsed = validate_entity_id(&raw);
            prop_assert!(parsed.is_ok(), "rejected: {}", raw);
            let parsed = parsed.unwrap();
            prop_assert_eq!(parsed.domain(), domain.as_str());
            prop_assert_eq!(parsed.entity(), entity.as_str());

            let domain_once = sanitize_identifier(parsed.domain()).unwrap();
            let domain_twice = sanitize_identifier(domain_once.as_str()).unwrap();
            prop_assert_eq!(domain_once.as_str(), parsed.domain());
            prop_assert_eq!(domain_twice, domain_once);
        }

        #[test]
        fn test_sanitize_is_idempotent(raw in "\\PC{1,80}") {
            if let Ok(once) = sanitize_identifier(&raw) {
                let twice = sanitize_identifier(once.as_str());
                prop_assert_eq!(twice, Ok(once));
            }
        }

        #[test]
        fn test_sanitized_output_has_no_dangerous_chars(raw in "\\PC{1,80}") {
            if let Ok(sanitized) = sanitize_identifier(&raw) {
                prop_assert!(!sanitized.as_str().contains(DANGEROUS_CHARS));
            }
        }

        #[test]
        fn test_denylisted_keyword_rejected_in_any_case(
            keyword in denylisted_keyword(),
            mask in prop::collection::vec(any::<bool>(), 1..8),
            prefix in "[-0-9hmd ]{0,6}",
            suffix in "[a-z0-9 ]{0,6}",
            in_stop in any::<bool>()
        ) {
            let expr = format!("{prefix}{}{suffix}", mix_case(keyword, &mask));
            let result = if in_stop {
                validate_time_range("-1h", &expr)
            } else {
                validate_time_range(&expr, "now()")
            };
            let is_dangerous = matches!(result, Err(ValidationError::DangerousPattern { .. }));
            prop_assert!(is_dangerous, "accepted: {:?}", expr);
        }

        #[test]
        fn test_valid_inputs_build_clean_queries(
            bucket in "[A-Za-z0-9_-]{1,40}",
            domain in "[a-z]{1,20}",
            entity in "[a-z0-9_]{1,40}",
            hours in 1u32..1000
        ) {
            let bucket = validate_bucket_name(&bucket).unwrap();
            let entity = validate_entity_id(&format!("{domain}.{entity}")).unwrap();
            let range = validate_time_range(&format!("-{hours}h"), "now()").unwrap();

            let query = build_query(&bucket, &entity, &range);
            prop_assert!(query.is_ok());
            prop_assert!(!check_for_injection(query.unwrap().as_str()));
        }
    }
}
