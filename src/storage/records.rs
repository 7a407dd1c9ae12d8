//! Row types of the dictionary tables and the journal mutation vocabulary.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::ids::{TermInLangId, TextId, TextInLangId, TypeId};

use super::database::TermDatabase;
use super::tables::DictTable;
use super::traits::{DictionaryRecord, Sealed, StorageError};

/// A term kind name (`label`, `description`, `alias`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(pub String);

/// A raw text string, shared by every language that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Text(pub String);

/// A text paired with a language code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextInLang {
    pub language: String,
    pub text_id: TextId,
}

/// A term kind paired with a text-in-language: the row entities reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermInLang {
    pub type_id: TypeId,
    pub text_in_lang_id: TextInLangId,
}

/// One journaled change. Batches of mutations are applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    InsertType {
        id: TypeId,
        name: String,
    },
    InsertText {
        id: TextId,
        text: String,
    },
    InsertTextInLang {
        id: TextInLangId,
        language: String,
        text_id: TextId,
    },
    InsertTermInLang {
        id: TermInLangId,
        type_id: TypeId,
        text_in_lang_id: TextInLangId,
    },
    UpdateAssociations {
        kind: EntityKind,
        entity: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        insert: Vec<TermInLangId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        remove: Vec<TermInLangId>,
    },
    DeleteTermInLang {
        id: TermInLangId,
    },
    DeleteTextInLang {
        id: TextInLangId,
    },
    DeleteText {
        id: TextId,
    },
    /// Id allocator positions, so ids of deleted rows stay retired after compaction.
    ReserveIds {
        types: u64,
        texts: u64,
        texts_in_lang: u64,
        terms_in_lang: u64,
    },
}

impl Sealed for TypeName {}
impl Sealed for Text {}
impl Sealed for TextInLang {}
impl Sealed for TermInLang {}

impl DictionaryRecord for TypeName {
    type Id = TypeId;
    const TABLE: &'static str = "term_type";

    fn cascade_parent(&self) -> Option<u64> {
        None
    }

    fn insert_mutation(&self, id: TypeId) -> Mutation {
        Mutation::InsertType {
            id,
            name: self.0.clone(),
        }
    }

    fn describe(&self) -> String {
        self.0.clone()
    }

    fn table(db: &TermDatabase) -> &RwLock<DictTable<Self>> {
        &db.types
    }
}

impl DictionaryRecord for Text {
    type Id = TextId;
    const TABLE: &'static str = "text";

    fn cascade_parent(&self) -> Option<u64> {
        None
    }

    fn insert_mutation(&self, id: TextId) -> Mutation {
        Mutation::InsertText {
            id,
            text: self.0.clone(),
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }

    fn table(db: &TermDatabase) -> &RwLock<DictTable<Self>> {
        &db.texts
    }
}

impl DictionaryRecord for TextInLang {
    type Id = TextInLangId;
    const TABLE: &'static str = "text_in_lang";

    fn cascade_parent(&self) -> Option<u64> {
        Some(self.text_id.get())
    }

    fn insert_mutation(&self, id: TextInLangId) -> Mutation {
        Mutation::InsertTextInLang {
            id,
            language: self.language.clone(),
            text_id: self.text_id,
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.language, self.text_id)
    }

    fn verify_parents(rows: &[&Self], db: &TermDatabase) -> Result<(), StorageError> {
        let text_ids: Vec<TextId> = rows.iter().map(|r| r.text_id).collect();
        db.require_rows::<Text>(Self::TABLE, &text_ids)
    }

    fn table(db: &TermDatabase) -> &RwLock<DictTable<Self>> {
        &db.texts_in_lang
    }
}

impl DictionaryRecord for TermInLang {
    type Id = TermInLangId;
    const TABLE: &'static str = "term_in_lang";

    fn cascade_parent(&self) -> Option<u64> {
        Some(self.text_in_lang_id.get())
    }

    fn insert_mutation(&self, id: TermInLangId) -> Mutation {
        Mutation::InsertTermInLang {
            id,
            type_id: self.type_id,
            text_in_lang_id: self.text_in_lang_id,
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.type_id, self.text_in_lang_id)
    }

    fn verify_parents(rows: &[&Self], db: &TermDatabase) -> Result<(), StorageError> {
        let til_ids: Vec<TextInLangId> = rows.iter().map(|r| r.text_in_lang_id).collect();
        db.require_rows::<TextInLang>(Self::TABLE, &til_ids)?;
        let type_ids: Vec<TypeId> = rows.iter().map(|r| r.type_id).collect();
        db.require_rows::<TypeName>(Self::TABLE, &type_ids)
    }

    fn table(db: &TermDatabase) -> &RwLock<DictTable<Self>> {
        &db.terms_in_lang
    }
}
