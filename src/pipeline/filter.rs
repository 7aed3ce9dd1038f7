//! Keyword and length filter.
//!
//! Matching is plain substring containment on the lower-cased text, so a
//! keyword also matches inside longer words ("go" matches "going").

use crate::config::FilterConfig;

/// Decide whether `text` qualifies for forwarding.
///
/// - empty text never qualifies
/// - text shorter than `min_message_length` characters never qualifies
/// - every required keyword must appear
/// - at least one optional keyword must appear, if any are configured
pub fn should_forward(text: &str, config: &FilterConfig) -> bool {
    if text.is_empty() {
        return false;
    }

    if text.chars().count() < config.min_message_length {
        return false;
    }

    let lower = text.to_lowercase();

    if !config.required_keywords.is_empty()
        && !config
            .required_keywords
            .iter()
            .all(|k| lower.contains(k.as_str()))
    {
        return false;
    }

    if !config.optional_keywords.is_empty()
        && !config
            .optional_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(required: &[&str], optional: &[&str], min: usize) -> FilterConfig {
        FilterConfig {
            required_keywords: required.iter().map(|s| s.to_string()).collect(),
            optional_keywords: optional.iter().map(|s| s.to_string()).collect(),
            min_message_length: min,
        }
    }

    #[test]
    fn empty_text_never_forwards() {
        assert!(!should_forward("", &cfg(&[], &[], 0)));
        assert!(!should_forward("", &cfg(&["a"], &["b"], 0)));
    }

    #[test]
    fn no_rules_forwards_anything_non_empty() {
        assert!(should_forward("x", &cfg(&[], &[], 0)));
    }

    #[test]
    fn shorter_than_min_length_is_dropped() {
        let c = cfg(&[], &[], 10);
        assert!(!should_forward("123456789", &c));
        assert!(should_forward("1234567890", &c));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let c = cfg(&[], &[], 5);
        // 5 characters, 10 bytes
        assert_eq!("приве".len(), 10);
        assert!(should_forward("приве", &c));
        assert!(!should_forward("при", &c));
    }

    #[test]
    fn all_required_present_forwards() {
        let c = cfg(&["alpha", "beta"], &[], 0);
        assert!(should_forward("Alpha and BETA together", &c));
    }

    #[test]
    fn missing_required_keyword_drops() {
        let c = cfg(&["a", "b"], &[], 0);
        assert!(!should_forward("a is here", &c));
    }

    #[test]
    fn one_optional_keyword_is_enough() {
        let c = cfg(&[], &["x", "y"], 0);
        assert!(should_forward("contains y only", &c));
        assert!(!should_forward("nothing relevant", &c));
    }

    #[test]
    fn required_and_optional_combined() {
        let c = cfg(&["go"], &["fast", "slow"], 5);
        assert!(should_forward("go fast now", &c));
        assert!(!should_forward("go now please", &c));
        assert!(!should_forward("fast but missing", &c));
        assert!(!should_forward("go f", &c));
    }

    #[test]
    fn keywords_match_inside_words() {
        let c = cfg(&["go"], &[], 0);
        assert!(should_forward("We are GOING home", &c));
    }
}
