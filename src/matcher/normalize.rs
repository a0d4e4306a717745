//! SQL text normalization and similarity
//!
//! Literals and bind parameters are folded into a single placeholder so that
//! executions with different arguments compare equal.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Placeholder substituted for literals and positional parameters
pub const PLACEHOLDER: &str = "$val$";

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'[^']*'").expect("string literal pattern is valid"));

static POSITIONAL_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\d+").expect("positional parameter pattern is valid"));

static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(\.\d+)?\b").expect("numeric literal pattern is valid"));

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Canonical form of a statement for fuzzy comparison
///
/// Positional parameters are replaced before numeric literals, otherwise
/// `$1` would become `$` followed by a placeholder.
pub fn normalize(sql: &str) -> String {
    let lowered = sql.to_lowercase();
    let text = STRING_LITERAL.replace_all(&lowered, NoExpand(PLACEHOLDER));
    let text = POSITIONAL_PARAM.replace_all(&text, NoExpand(PLACEHOLDER));
    let text = NUMERIC_LITERAL.replace_all(&text, NoExpand(PLACEHOLDER));
    let text = WHITESPACE.replace_all(&text, NoExpand(" "));
    text.trim().to_string()
}

/// Normalized edit-distance similarity in `0.0..=1.0`
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}
