//! Fingerprints: the labels, descriptions and aliases of one entity.
//!
//! A fingerprint is built by the caller from entity state before each store
//! operation. It is never persisted as such; the store flattens it into
//! typed, per-language term lists with [`terms_by_type_and_language`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed vocabulary of term kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    Label,
    Description,
    Alias,
}

impl TermType {
    pub const ALL: [Self; 3] = [Self::Label, Self::Description, Self::Alias];

    /// The name stored in the type dictionary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Description => "description",
            Self::Alias => "alias",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terms grouped as `type name -> language -> texts`.
pub type TermsByTypeAndLanguage = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Labels, descriptions and aliases of one entity, keyed by language.
///
/// # Examples
///
/// ```
/// use termstore::Fingerprint;
///
/// let fp = Fingerprint::new()
///     .with_label("en", "cat")
///     .with_description("en", "small domesticated carnivore")
///     .with_aliases("en", ["house cat", "kitty"]);
/// assert_eq!(fp.label("en"), Some("cat"));
/// assert_eq!(fp.term_count(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

impl Fingerprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.set_label(language, text);
        self
    }

    #[must_use]
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.set_description(language, text);
        self
    }

    #[must_use]
    pub fn with_aliases<I, S>(mut self, language: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_aliases(language, aliases);
        self
    }

    pub fn set_label(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.labels.insert(language.into(), text.into());
    }

    pub fn set_description(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.descriptions.insert(language.into(), text.into());
    }

    /// Replaces the aliases of a language. An empty list removes the language.
    pub fn set_aliases<I, S>(&mut self, language: impl Into<String>, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let language = language.into();
        let aliases: Vec<String> = aliases.into_iter().map(Into::into).collect();
        if aliases.is_empty() {
            self.aliases.remove(&language);
        } else {
            self.aliases.insert(language, aliases);
        }
    }

    /// Appends a single alias, used when rebuilding a fingerprint from storage.
    pub fn push_alias(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.aliases.entry(language.into()).or_default().push(text.into());
    }

    #[must_use]
    pub fn label(&self, language: &str) -> Option<&str> {
        self.labels.get(language).map(String::as_str)
    }

    #[must_use]
    pub fn description(&self, language: &str) -> Option<&str> {
        self.descriptions.get(language).map(String::as_str)
    }

    #[must_use]
    pub fn aliases(&self, language: &str) -> &[String] {
        self.aliases.get(language).map_or(&[], Vec::as_slice)
    }

    /// Total number of individual terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.labels.len()
            + self.descriptions.len()
            + self.aliases.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.term_count() == 0
    }
}

/// Flattens a fingerprint into `type -> language -> texts`.
///
/// Purely structural: texts are passed through unchanged, normalization and
/// deduplication happen during acquisition. Types with no terms are omitted.
#[must_use]
pub fn terms_by_type_and_language(fingerprint: &Fingerprint) -> TermsByTypeAndLanguage {
    let mut out = TermsByTypeAndLanguage::new();

    let singles = [
        (TermType::Label, &fingerprint.labels),
        (TermType::Description, &fingerprint.descriptions),
    ];
    for (term_type, by_language) in singles {
        if by_language.is_empty() {
            continue;
        }
        let entry = out.entry(term_type.as_str().to_string()).or_default();
        for (language, text) in by_language {
            entry.insert(language.clone(), vec![text.clone()]);
        }
    }

    if !fingerprint.aliases.is_empty() {
        let entry = out.entry(TermType::Alias.as_str().to_string()).or_default();
        for (language, texts) in &fingerprint.aliases {
            if !texts.is_empty() {
                entry.insert(language.clone(), texts.clone());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_type_names() {
        for t in TermType::ALL {
            assert_eq!(TermType::from_name(t.as_str()), Some(t));
        }
        assert_eq!(TermType::from_name("sitelink"), None);
    }

    #[test]
    fn test_flatten_groups_by_type_and_language() {
        let fp = Fingerprint::new()
            .with_label("en", "cat")
            .with_label("de", "Katze")
            .with_aliases("en", ["kitty", "house cat"]);

        let terms = terms_by_type_and_language(&fp);
        assert_eq!(terms.len(), 2);
        assert_eq!(terms["label"]["de"], vec!["Katze".to_string()]);
        assert_eq!(terms["alias"]["en"], vec!["kitty".to_string(), "house cat".to_string()]);
        assert!(!terms.contains_key("description"));
    }

    #[test]
    fn test_empty_fingerprint_flattens_to_nothing() {
        assert!(terms_by_type_and_language(&Fingerprint::new()).is_empty());
    }

    #[test]
    fn test_set_aliases_empty_removes_language() {
        let mut fp = Fingerprint::new().with_aliases("en", ["a"]);
        fp.set_aliases("en", Vec::<String>::new());
        assert!(fp.is_empty());
        assert!(fp.aliases("en").is_empty());
    }
}
