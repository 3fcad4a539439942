//! Serial number (ISSN) normalization and recovery from free text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Patterns (compiled once via LazyLock)
// ---------------------------------------------------------------------------

/// Strict ISSN shape, used to recover identifiers from free-text fields.
static ISSN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]{4}-[0-9]{3}[0-9X]").unwrap());

/// Canonical hyphenated shape accepted for the primary identifier columns.
static CANONICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Z]{4}-[0-9A-Z]{4}$").unwrap());

/// Bring a serial number into `NNNN-NNNC` form.
///
/// Trims and upper-cases the input; eight bare characters get a hyphen after
/// the fourth. Anything else is returned trimmed and upper-cased. The function
/// is idempotent.
pub fn normalize_serial_number(s: &str) -> String {
    let s = s.trim().to_uppercase();
    if s.chars().count() == 8 && s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return format!("{}-{}", &s[..4], &s[4..]);
    }
    s
}

/// True when `s` already has the canonical hyphenated eight character shape.
pub fn is_canonical(s: &str) -> bool {
    CANONICAL_RE.is_match(s)
}

/// All ISSNs embedded in a free-text field such as `"1990-0104;1990-0090"`.
pub fn find_serial_numbers(s: &str) -> Vec<String> {
    let upper = s.to_uppercase();
    ISSN_RE
        .find_iter(&upper)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Normalize every value and keep the ones with canonical shape.
pub fn normalized_set<'a, I>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    values
        .into_iter()
        .map(|v| normalize_serial_number(v))
        .filter(|v| is_canonical(v))
        .collect()
}
