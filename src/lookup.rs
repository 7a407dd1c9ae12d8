//! Read side: fingerprints and term texts by entity, entities by term.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::{TermStoreError, TermStoreResult};
use crate::fingerprint::{Fingerprint, TermType};
use crate::ids::{TermInLangId, TextId, TextInLangId, TypeId};
use crate::normalize::StringNormalizer;
use crate::storage::{DictionaryRecord, TermDatabase, TermInLang, Text, TextInLang, TypeName};

/// Resolves stored terms without writing anything.
pub struct TermLookup {
    db: Arc<TermDatabase>,
    normalizer: StringNormalizer,
}

impl TermLookup {
    #[must_use]
    pub fn new(db: Arc<TermDatabase>, normalizer: StringNormalizer) -> Self {
        Self { db, normalizer }
    }

    /// Rebuilds an entity's fingerprint from its association rows.
    ///
    /// Aliases come back in term-id order. An entity without terms yields an
    /// empty fingerprint.
    pub fn fingerprint_for(&self, entity_id: &EntityId) -> TermStoreResult<Fingerprint> {
        if entity_id.is_foreign() {
            return Err(TermStoreError::ForeignEntityRejected {
                entity_id: entity_id.clone(),
            });
        }

        let ids: Vec<TermInLangId> = self
            .db
            .association_ids(entity_id.kind(), entity_id.numeric())?
            .into_iter()
            .collect();
        let terms = self.db.rows::<TermInLang>(&ids)?;

        let til_ids: Vec<TextInLangId> = terms.values().map(|t| t.text_in_lang_id).collect();
        let type_ids: Vec<TypeId> = terms.values().map(|t| t.type_id).collect();
        let tils = self.db.rows::<TextInLang>(&til_ids)?;
        let types = self.db.rows::<TypeName>(&type_ids)?;
        let text_ids: Vec<TextId> = tils.values().map(|t| t.text_id).collect();
        let texts = self.db.rows::<Text>(&text_ids)?;

        let mut fingerprint = Fingerprint::new();
        // Rows removed by a concurrent write are skipped.
        for id in &ids {
            let Some(term) = terms.get(id) else { continue };
            let Some(term_type) = types
                .get(&term.type_id)
                .and_then(|t| TermType::from_name(&t.0))
            else {
                continue;
            };
            let Some(til) = tils.get(&term.text_in_lang_id) else { continue };
            let Some(text) = texts.get(&til.text_id) else { continue };

            let (language, text) = (til.language.clone(), text.0.clone());
            match term_type {
                TermType::Label => fingerprint.set_label(language, text),
                TermType::Description => fingerprint.set_description(language, text),
                TermType::Alias => fingerprint.push_alias(language, text),
            }
        }
        Ok(fingerprint)
    }

    /// Labels of the given entities in one language. Entities without one are absent.
    pub fn labels_for(
        &self,
        entity_ids: &[EntityId],
        language: &str,
    ) -> TermStoreResult<BTreeMap<EntityId, String>> {
        self.single_terms_for(entity_ids, language, TermType::Label)
    }

    pub fn descriptions_for(
        &self,
        entity_ids: &[EntityId],
        language: &str,
    ) -> TermStoreResult<BTreeMap<EntityId, String>> {
        self.single_terms_for(entity_ids, language, TermType::Description)
    }

    fn single_terms_for(
        &self,
        entity_ids: &[EntityId],
        language: &str,
        term_type: TermType,
    ) -> TermStoreResult<BTreeMap<EntityId, String>> {
        let language = self.normalizer.language(language);
        let mut out = BTreeMap::new();
        for entity_id in entity_ids {
            let fingerprint = self.fingerprint_for(entity_id)?;
            let text = match term_type {
                TermType::Label => fingerprint.label(&language),
                TermType::Description => fingerprint.description(&language),
                TermType::Alias => None,
            };
            if let Some(text) = text {
                out.insert(entity_id.clone(), text.to_string());
            }
        }
        Ok(out)
    }

    /// Entities of any kind that have this exact term.
    ///
    /// The text and language are normalized the same way writes are.
    pub fn entities_with_term(
        &self,
        term_type: TermType,
        language: &str,
        text: &str,
    ) -> TermStoreResult<Vec<EntityId>> {
        match self.term_in_lang_id(term_type, language, text)? {
            Some(id) => Ok(self.db.entities_referencing(id)?),
            None => Ok(Vec::new()),
        }
    }

    /// Id of an existing term row, without creating anything.
    pub fn term_in_lang_id(
        &self,
        term_type: TermType,
        language: &str,
        text: &str,
    ) -> TermStoreResult<Option<TermInLangId>> {
        let type_name = TypeName(term_type.as_str().to_string());
        let Some(type_id) = self.select_one(type_name)? else {
            return Ok(None);
        };
        let text = Text(self.normalizer.text(text));
        let Some(text_id) = self.select_one(text)? else {
            return Ok(None);
        };
        let til = TextInLang {
            language: self.normalizer.language(language),
            text_id,
        };
        let Some(text_in_lang_id) = self.select_one(til)? else {
            return Ok(None);
        };
        let term = TermInLang {
            type_id,
            text_in_lang_id,
        };
        self.select_one(term)
    }

    fn select_one<R: DictionaryRecord>(&self, value: R) -> TermStoreResult<Option<R::Id>> {
        Ok(self.db.select_ids(std::slice::from_ref(&value))?.remove(&value))
    }
}
