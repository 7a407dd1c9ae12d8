//! Resolution of typed, per-language texts to term-in-language ids.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::config::TermStoreConfig;
use crate::dictionary::{TermInLangDictionary, TextDictionary, TextInLangDictionary, TypeDictionary};
use crate::error::{TermStoreError, TermStoreResult, ValidationError};
use crate::fingerprint::{TermType, TermsByTypeAndLanguage};
use crate::ids::TermInLangId;
use crate::normalize::StringNormalizer;
use crate::storage::{StorageError, TermDatabase, TermInLang, Text, TextInLang, TypeName};

/// Turns `type -> language -> texts` into the set of term-in-language ids
/// an entity should reference, creating any missing rows.
pub trait TermInLangIdsAcquirer: Send + Sync {
    /// Returns one id per distinct normalized (type, language, text) triple.
    ///
    /// Texts that normalize to the empty string are skipped.
    fn acquire_term_in_lang_ids(
        &self,
        terms: &TermsByTypeAndLanguage,
    ) -> TermStoreResult<BTreeSet<TermInLangId>>;
}

/// A normalized (type, language, text) triple.
type Triple = (String, String, String);

/// Acquirer backed by the four database dictionaries.
pub struct DatabaseTermInLangIdsAcquirer {
    normalizer: StringNormalizer,
    config: TermStoreConfig,
    types: TypeDictionary,
    texts: TextDictionary,
    texts_in_lang: TextInLangDictionary,
    terms_in_lang: TermInLangDictionary,
    /// Runs between text acquisition and text-in-language acquisition.
    #[cfg(test)]
    after_texts: Option<Box<dyn Fn() + Send + Sync>>,
}

impl DatabaseTermInLangIdsAcquirer {
    #[must_use]
    pub fn new(db: Arc<TermDatabase>, normalizer: StringNormalizer) -> Self {
        Self {
            normalizer,
            config: db.config().clone(),
            types: TypeDictionary::new(Arc::clone(&db)),
            texts: TextDictionary::new(Arc::clone(&db)),
            texts_in_lang: TextInLangDictionary::new(Arc::clone(&db)),
            terms_in_lang: TermInLangDictionary::new(db),
            #[cfg(test)]
            after_texts: None,
        }
    }

    /// Normalizes and validates the input. Fails before anything is written.
    fn prepare(&self, terms: &TermsByTypeAndLanguage) -> Result<BTreeSet<Triple>, ValidationError> {
        let mut triples = BTreeSet::new();
        for (type_name, by_language) in terms {
            if type_name.trim().is_empty() {
                return Err(ValidationError::EmptyTermType);
            }
            // Labels and descriptions hold one text per language; aliases merge.
            let single_valued = matches!(
                TermType::from_name(type_name),
                Some(TermType::Label | TermType::Description)
            );
            let mut seen: HashMap<String, &str> = HashMap::new();
            for (raw_language, texts) in by_language {
                let language = self.normalizer.language(raw_language);
                if language.is_empty() {
                    return Err(ValidationError::EmptyLanguage);
                }
                if let Some(first) = seen.insert(language.clone(), raw_language.as_str()) {
                    if single_valued {
                        return Err(ValidationError::ConflictingLanguage {
                            term_type: type_name.clone(),
                            language,
                            first: first.to_string(),
                            second: raw_language.clone(),
                        });
                    }
                }
                if language.len() > self.config.max_language_bytes {
                    return Err(ValidationError::LanguageTooLong {
                        language,
                        max_bytes: self.config.max_language_bytes,
                    });
                }
                for text in texts {
                    let text = self.normalizer.text(text);
                    if text.is_empty() {
                        continue;
                    }
                    if text.len() > self.config.max_text_bytes {
                        return Err(ValidationError::TextTooLong {
                            max_bytes: self.config.max_text_bytes,
                            actual_bytes: text.len(),
                        });
                    }
                    triples.insert((type_name.clone(), language.clone(), text));
                }
            }
        }
        Ok(triples)
    }

    /// One bottom-up resolution pass.
    fn resolve(&self, triples: &BTreeSet<Triple>) -> Result<BTreeSet<TermInLangId>, StorageError> {
        let type_names: Vec<TypeName> = dedup(triples.iter().map(|(t, _, _)| TypeName(t.clone())));
        let texts: Vec<Text> = dedup(triples.iter().map(|(_, _, s)| Text(s.clone())));

        let type_ids = self.types.try_acquire(&type_names)?;
        let text_ids = self.texts.try_acquire(&texts)?;
        #[cfg(test)]
        if let Some(hook) = &self.after_texts {
            hook();
        }

        let mut til_keys: HashMap<(&str, &str), TextInLang> = HashMap::new();
        for (_, language, text) in triples {
            let text_id = text_ids[&Text(text.clone())];
            til_keys
                .entry((language.as_str(), text.as_str()))
                .or_insert_with(|| TextInLang {
                    language: language.clone(),
                    text_id,
                });
        }
        let til_values: Vec<TextInLang> = til_keys.values().cloned().collect();
        let til_ids = self.texts_in_lang.try_acquire(&til_values)?;

        let terms: Vec<TermInLang> = dedup(triples.iter().map(|(type_name, language, text)| {
            TermInLang {
                type_id: type_ids[&TypeName(type_name.clone())],
                text_in_lang_id: til_ids[&til_keys[&(language.as_str(), text.as_str())]],
            }
        }));
        let term_ids = self.terms_in_lang.try_acquire(&terms)?;

        Ok(term_ids.into_values().collect())
    }
}

fn dedup<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    values.collect::<BTreeSet<_>>().into_iter().collect()
}

impl TermInLangIdsAcquirer for DatabaseTermInLangIdsAcquirer {
    fn acquire_term_in_lang_ids(
        &self,
        terms: &TermsByTypeAndLanguage,
    ) -> TermStoreResult<BTreeSet<TermInLangId>> {
        let triples = self.prepare(terms)?;
        if triples.is_empty() {
            return Ok(BTreeSet::new());
        }

        let max_attempts = self.config.max_acquire_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.resolve(&triples) {
                Ok(ids) => return Ok(ids),
                // A cleaner removed a parent row between our select and insert.
                Err(StorageError::ForeignKeyViolation { table, parent, id }) => {
                    if attempt >= max_attempts {
                        return Err(TermStoreError::TransientStorageConflict {
                            table,
                            attempts: attempt,
                        });
                    }
                    debug!(
                        table,
                        parent,
                        id,
                        attempt,
                        "parent row vanished during acquisition, retrying"
                    );
                }
                Err(StorageError::DuplicateKey { table, .. }) => {
                    return Err(TermStoreError::TransientStorageConflict {
                        table,
                        attempts: max_attempts,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}
