//! Text normalization applied before dictionary lookup.
//!
//! Two inputs that differ only in Unicode composition, stray control
//! characters or surrounding whitespace must resolve to the same dictionary
//! row. All functions here are pure and idempotent.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

const BYTE_ORDER_MARK: char = '\u{FEFF}';

fn edge_junk() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\p{Z}\p{C}]+|[\p{Z}\p{C}]+$")
            .unwrap_or_else(|e| panic!("invalid edge regex: {e}"))
    })
}

fn inner_controls() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\p{Cc}+").unwrap_or_else(|e| panic!("invalid control regex: {e}"))
    })
}

/// Canonicalizes a term text.
///
/// Removes byte-order marks, applies NFC, collapses each run of control
/// characters (tabs, newlines, ...) to one space, and trims separator,
/// control and format characters from both ends.
///
/// ```
/// use termstore::normalize::cleanup_text;
///
/// assert_eq!(cleanup_text("  cat\t\n"), "cat");
/// assert_eq!(cleanup_text("big\ncat"), "big cat");
/// assert_eq!(cleanup_text("Cafe\u{301}"), "Café");
/// ```
#[must_use]
pub fn cleanup_text(input: &str) -> String {
    let without_bom: String = input.chars().filter(|&c| c != BYTE_ORDER_MARK).collect();
    let composed: String = without_bom.nfc().collect();
    let spaced = inner_controls().replace_all(&composed, " ");
    edge_junk().replace_all(&spaced, "").into_owned()
}

/// Canonicalizes a language code: trimmed and ASCII-lowercased.
#[must_use]
pub fn normalize_language(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

/// Normalizer handed to the components that resolve texts.
///
/// Holds no state; it exists so collaborators receive normalization by
/// constructor injection and tests can see exactly which rules apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringNormalizer;

impl StringNormalizer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn text(&self, input: &str) -> String {
        cleanup_text(input)
    }

    #[must_use]
    pub fn language(&self, input: &str) -> String {
        normalize_language(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_unicode_whitespace() {
        assert_eq!(cleanup_text("\u{00A0}\u{2003}cat\u{3000}"), "cat");
    }

    #[test]
    fn test_strips_bom_and_format_chars_at_edges() {
        assert_eq!(cleanup_text("\u{FEFF}cat"), "cat");
        assert_eq!(cleanup_text("\u{200B}cat\u{200B}"), "cat");
    }

    #[test]
    fn test_control_runs_become_single_space() {
        assert_eq!(cleanup_text("a\r\n\tb"), "a b");
    }

    #[test]
    fn test_nfc_equivalence() {
        let decomposed = "e\u{301}cole";
        let composed = "\u{e9}cole";
        assert_eq!(cleanup_text(decomposed), cleanup_text(composed));
    }

    #[test]
    fn test_idempotent() {
        for s in ["  x  ", "a\tb", "\u{FEFF}Zoë\n", "", "   "] {
            let once = cleanup_text(s);
            assert_eq!(cleanup_text(&once), once);
        }
    }

    #[test]
    fn test_whitespace_only_becomes_empty() {
        assert_eq!(cleanup_text(" \t\n "), "");
    }

    #[test]
    fn test_language_normalization() {
        assert_eq!(normalize_language(" EN-gb "), "en-gb");
        assert_eq!(StringNormalizer::new().language("De"), "de");
    }
}
