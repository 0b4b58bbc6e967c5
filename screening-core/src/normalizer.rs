//! Name normalization
//!
//! One raw name yields three forms:
//! - `display`: trimmed, whitespace collapsed, original casing (shown to the caller)
//! - `key`: case-folded, diacritics and punctuation removed (cache lookups and cross-source matching)
//! - `path_segment`: storage-safe lowercase segment used in evidence folder keys

use crate::error::{Error, Result};
use crate::types::SearchType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Longest accepted name, in characters
pub const MAX_NAME_LENGTH: usize = 200;

/// Longest storage path segment, in characters
pub const MAX_PATH_SEGMENT_LENGTH: usize = 50;

lazy_static::lazy_static! {
    static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").expect("static regex");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedName {
    pub display: String,
    pub key: String,
    pub path_segment: String,
    pub search_type: SearchType,
}

impl NormalizedName {
    /// Key tokens, in order
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.key.split_whitespace()
    }
}

/// Normalize a raw request name
pub fn normalize(raw: &str, search_type: SearchType) -> Result<NormalizedName> {
    let display = collapse_whitespace(raw);
    if display.is_empty() {
        return Err(Error::InvalidInput("Name is required".to_string()));
    }

    let length = display.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Name too long: max {} characters, got {}",
            MAX_NAME_LENGTH, length
        )));
    }

    let key = match_key(&display);
    if key.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Name '{}' has no searchable characters",
            display
        )));
    }

    Ok(NormalizedName {
        path_segment: path_segment(&display),
        display,
        key,
        search_type,
    })
}

/// Matching key for any name (queries, list entries, live-source suggestions)
pub fn match_key(name: &str) -> String {
    let folded = fold_diacritics(&name.to_lowercase()).to_lowercase();
    let cleaned = PUNCTUATION.replace_all(&folded, "");
    collapse_whitespace(&cleaned)
}

/// Storage-safe folder segment
pub fn path_segment(name: &str) -> String {
    let folded = fold_diacritics(name);
    let safe: String = folded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    safe.trim()
        .replace(' ', "_")
        .to_lowercase()
        .chars()
        .take(MAX_PATH_SEGMENT_LENGTH)
        .collect()
}

fn fold_diacritics(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_name_normalization() {
        let name = normalize("  John   O'Brien, Jr. ", SearchType::Person).unwrap();
        assert_eq!(name.display, "John O'Brien, Jr.");
        assert_eq!(name.key, "john obrien jr");
        assert_eq!(name.path_segment, "john_o_brien__jr_");
    }

    #[test]
    fn test_diacritics_folded() {
        assert_eq!(match_key("Željko Ražnatović"), "zeljko raznatovic");
        assert_eq!(match_key("ACME   Holdings"), "acme holdings");
        assert_eq!(path_segment("Société Générale"), "societe_generale");
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            normalize("   \t ", SearchType::Entity),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            normalize("!!!", SearchType::Entity),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_overlong_input_rejected() {
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(
            normalize(&long, SearchType::Person),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_path_segment_truncated() {
        let long = "x".repeat(120);
        assert_eq!(path_segment(&long).chars().count(), MAX_PATH_SEGMENT_LENGTH);
    }

    proptest! {
        #[test]
        fn prop_match_key_idempotent(raw in "[A-Za-zÀ-ÿ '.,-]{0,40}") {
            let once = match_key(&raw);
            prop_assert_eq!(match_key(&once), once.clone());
            prop_assert_eq!(once.trim(), once.as_str());
            prop_assert!(!once.contains("  "));
        }

        #[test]
        fn prop_path_segment_is_storage_safe(raw in "\\PC{0,80}") {
            let segment = path_segment(&raw);
            prop_assert!(segment.chars().count() <= MAX_PATH_SEGMENT_LENGTH);
            prop_assert!(!segment.contains('/'));
            prop_assert!(!segment.contains(' '));
        }

        #[test]
        fn prop_casing_does_not_change_key(raw in "[A-Za-z ]{1,30}") {
            prop_assert_eq!(match_key(&raw.to_uppercase()), match_key(&raw.to_lowercase()));
        }
    }
}
