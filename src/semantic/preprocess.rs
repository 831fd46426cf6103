//! Keyword preprocessing shared by indexing and matching.
//!
//! Keywords arrive from upstream extractors in two shapes:
//! 1. One keyword per file association row
//! 2. Several keywords joined with commas in a single video frame row
//!
//! Everything here works on plain strings so both shapes go through the
//! same trimming and comparison rules.

use std::collections::HashSet;

/// Separator used by upstream extractors when several keywords share one frame.
pub const KEYWORD_LIST_SEPARATOR: char = ',';

/// Trim a raw keyword. Returns `None` when nothing is left.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Trim, drop empty strings and drop exact duplicates, keeping first-seen order.
///
/// Duplicates are exact-string: `"AI"` and `"ai"` both survive.
pub fn dedupe_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .filter_map(|k| normalize_keyword(k.as_ref()))
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Split a comma-joined keyword field into trimmed, non-empty tokens.
pub fn split_keyword_list(field: &str) -> Vec<String> {
    field
        .split(KEYWORD_LIST_SEPARATOR)
        .filter_map(normalize_keyword)
        .collect()
}

/// Comma-list membership test for frame keyword fields.
///
/// A field contains `token` when it is the token itself, starts with
/// `"token,"`, contains `", token,"` or ends with `", token"`. Comparing
/// against the trimmed tokens accepts all four forms and also tolerates
/// fields written without the space after the comma.
pub fn list_contains_token(field: &str, token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }

    field
        .split(KEYWORD_LIST_SEPARATOR)
        .any(|part| part.trim() == token)
}

/// Case-insensitive substring test. `needle_lower` must already be lowercased.
pub fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
