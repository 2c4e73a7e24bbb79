//! Edge case tests for shared-data-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use proptest::prelude::*;
use serde_json::json;
use shared_data_engine::{value, KeyCodec, KeyPattern, Notification};

// ============================================================================
// Pattern Edge Cases
// ============================================================================

#[test]
fn empty_pattern_matches_only_empty_key() {
    let p = KeyPattern::new("").unwrap();
    assert!(p.matches(""));
    assert!(!p.matches("a"));
}

#[test]
fn consecutive_wildcards_behave_like_one() {
    let p = KeyPattern::new("a**b").unwrap();
    assert!(p.matches("ab"));
    assert!(p.matches("a-x-b"));
    assert!(!p.matches("a-x-c"));
}

#[test]
fn unicode_keys() {
    let p = KeyPattern::new("用户:*").unwrap();
    assert!(p.matches("用户:张三"));
    assert!(p.matches("用户:🎉"));
    assert!(!p.matches("user:张三"));
}

#[test]
fn glob_characters_other_than_star_are_literal() {
    let p = KeyPattern::new("a?[bc]").unwrap();
    assert!(p.matches("a?[bc]"));
    assert!(!p.matches("ab"));
    assert!(!p.matches("axb"));
}

// ============================================================================
// Key Layout Edge Cases
// ============================================================================

#[test]
fn prefix_containing_marker_text() {
    let codec = KeyCodec::new("d:d:");
    let physical = codec.data_key("d:x");
    assert_eq!(physical, "d:d:d:d:x");
    assert_eq!(codec.strip_data_key(&physical), Some("d:x"));
}

#[test]
fn data_pattern_matches_physical_keys_through_pattern() {
    let codec = KeyCodec::new("p:");
    let p = KeyPattern::new(codec.data_key("sum:*")).unwrap();
    assert!(p.matches(&codec.data_key("sum:1")));
    assert!(!p.matches(&codec.data_key("other")));
    assert!(!p.matches(&codec.live_value_key("sum", "1")));
}

#[test]
fn live_namespaces_do_not_overlap_data_scan() {
    let codec = KeyCodec::default();
    let all = KeyPattern::new(codec.data_pattern_all()).unwrap();
    assert!(!all.matches(&codec.live_value_key("g", "n")));
    assert!(!all.matches(&codec.live_set_key("g")));
}

// ============================================================================
// Notification Edge Cases
// ============================================================================

#[test]
fn notification_key_with_quotes_and_newlines() {
    let n = Notification::update("a\"b\nc", "id");
    let decoded = Notification::decode(&n.encode()).unwrap();
    assert_eq!(decoded.key, "a\"b\nc");
}

#[test]
fn notification_ignores_unknown_fields() {
    let n = Notification::decode(r#"{"k":"a","i":"b","v":42}"#).unwrap();
    assert_eq!(n, Notification::update("a", "b"));
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries_decode_exactly() {
    for v in [i64::MIN, i64::MAX, 0, -1, 1] {
        assert_eq!(value::decode("k", &v.to_string()).unwrap(), json!(v));
    }
}

#[test]
fn sum_over_mixed_values() {
    let values = [json!(1), json!("2"), json!(true), json!(null)];
    assert_eq!(value::sum(values.iter().map(value::to_number)), 4.0);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn literal_patterns_match_themselves(s in "[^*]{0,24}") {
        let p = KeyPattern::new(s.clone()).unwrap();
        prop_assert!(p.matches(&s));
        let longer = format!("{}x", s);
        prop_assert!(!p.matches(&longer));
    }

    #[test]
    fn prefix_star_matches_any_suffix(prefix in "[^*]{0,12}", suffix in ".{0,12}") {
        let p = KeyPattern::new(format!("{}*", prefix)).unwrap();
        let key = format!("{}{}", prefix, suffix);
        prop_assert!(p.matches(&key));
    }

    #[test]
    fn strip_inverts_data_key(prefix in "[a-z:]{0,6}", key in ".{0,24}") {
        let codec = KeyCodec::new(prefix);
        let physical = codec.data_key(&key);
        prop_assert_eq!(codec.strip_data_key(&physical), Some(key.as_str()));
    }
}
