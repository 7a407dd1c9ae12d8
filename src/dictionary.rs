//! Content-addressed dictionaries over the database's lookup tables.
//!
//! All four dictionaries share one acquisition algorithm:
//!
//! 1. Select the ids of values that already have rows.
//! 2. Insert every missing value in one all-or-nothing batch.
//! 3. If another writer inserted one of them first (unique-key conflict),
//!    re-select and try again with whatever is still missing.
//!
//! A value is never checked and then inserted under separate locks, so two
//! concurrent callers cannot create two rows for the same value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{TermStoreError, TermStoreResult};
use crate::storage::{
    DictionaryRecord, StorageError, TermDatabase, TermInLang, Text, TextInLang, TypeName,
};

/// Maps term kind names to ids.
pub type TypeDictionary = Dictionary<TypeName>;
/// Maps raw texts to ids (first level of text deduplication).
pub type TextDictionary = Dictionary<Text>;
/// Maps (language, text id) pairs to ids (second level).
pub type TextInLangDictionary = Dictionary<TextInLang>;
/// Maps (type id, text-in-language id) pairs to the ids entities reference.
pub type TermInLangDictionary = Dictionary<TermInLang>;

/// One dictionary table, with insert-or-fetch acquisition.
pub struct Dictionary<R: DictionaryRecord> {
    db: Arc<TermDatabase>,
    max_attempts: u32,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R: DictionaryRecord> Clone for Dictionary<R> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            max_attempts: self.max_attempts,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: DictionaryRecord> Dictionary<R> {
    #[must_use]
    pub fn new(db: Arc<TermDatabase>) -> Self {
        let max_attempts = db.config().max_acquire_attempts;
        Self {
            db,
            max_attempts,
            _record: std::marker::PhantomData,
        }
    }

    /// Returns an id for every value, inserting rows for unseen ones.
    ///
    /// # Errors
    /// - `TransientStorageConflict` if unique-key races did not settle within
    ///   `max_acquire_attempts`, or a parent row was deleted concurrently.
    /// - `StorageUnavailable` on journal or lock failure.
    pub fn acquire_ids(&self, values: &[R]) -> TermStoreResult<HashMap<R, R::Id>> {
        self.try_acquire(values).map_err(|err| match err {
            StorageError::DuplicateKey { table, .. } => TermStoreError::TransientStorageConflict {
                table,
                attempts: self.max_attempts,
            },
            other => other.into(),
        })
    }

    /// Acquisition that reports the raw storage error, so callers one level
    /// up can tell a vanished parent from an exhausted retry budget.
    pub(crate) fn try_acquire(&self, values: &[R]) -> Result<HashMap<R, R::Id>, StorageError> {
        let mut found = self.db.select_ids(values)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut seen = HashSet::new();
            let missing: Vec<R> = values
                .iter()
                .filter(|v| !found.contains_key(*v) && seen.insert(*v))
                .cloned()
                .collect();
            if missing.is_empty() {
                return Ok(found);
            }

            match self.db.insert_new(&missing) {
                Ok(inserted) => {
                    found.extend(inserted);
                    return Ok(found);
                }
                Err(err @ StorageError::DuplicateKey { .. }) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    debug!(
                        table = R::TABLE,
                        attempt,
                        missing = missing.len(),
                        "lost insert race, re-selecting"
                    );
                    found.extend(self.db.select_ids(&missing)?);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns the stored values for `ids`. Unknown ids are absent.
    pub fn resolve(&self, ids: &[R::Id]) -> TermStoreResult<HashMap<R::Id, R>> {
        Ok(self.db.rows(ids)?)
    }

    /// Id of one value, without inserting.
    pub fn lookup(&self, value: &R) -> TermStoreResult<Option<R::Id>> {
        Ok(self.db.select_ids(std::slice::from_ref(value))?.remove(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TextId;
    use std::thread;

    fn texts(values: &[&str]) -> Vec<Text> {
        values.iter().map(|s| Text((*s).to_string())).collect()
    }

    #[test]
    fn test_acquire_reuses_existing_ids() {
        let dict = TextDictionary::new(Arc::new(TermDatabase::in_memory()));
        let first = dict.acquire_ids(&texts(&["cat", "dog"])).unwrap();
        let second = dict.acquire_ids(&texts(&["dog", "bird", "cat"])).unwrap();

        assert_eq!(second.len(), 3);
        assert_eq!(first[&Text("cat".into())], second[&Text("cat".into())]);
        assert_eq!(first[&Text("dog".into())], second[&Text("dog".into())]);
    }

    #[test]
    fn test_acquire_deduplicates_input() {
        let db = Arc::new(TermDatabase::in_memory());
        let dict = TextDictionary::new(Arc::clone(&db));
        let ids = dict.acquire_ids(&texts(&["cat", "cat", "cat"])).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.row_count::<Text>().unwrap(), 1);
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let db = Arc::new(TermDatabase::in_memory());
        let ids = TypeDictionary::new(Arc::clone(&db)).acquire_ids(&[]).unwrap();
        assert!(ids.is_empty());
        assert_eq!(db.row_count::<TypeName>().unwrap(), 0);
    }

    #[test]
    fn test_missing_parent_is_a_conflict() {
        let dict = TextInLangDictionary::new(Arc::new(TermDatabase::in_memory()));
        let err = dict
            .acquire_ids(&[TextInLang {
                language: "en".to_string(),
                text_id: TextId::new(7),
            }])
            .unwrap_err();
        assert!(matches!(
            err,
            TermStoreError::TransientStorageConflict {
                table: "text_in_lang",
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_and_lookup() {
        let dict = TypeDictionary::new(Arc::new(TermDatabase::in_memory()));
        let ids = dict.acquire_ids(&[TypeName("label".into())]).unwrap();
        let id = ids[&TypeName("label".into())];

        assert_eq!(dict.lookup(&TypeName("label".into())).unwrap(), Some(id));
        assert_eq!(dict.lookup(&TypeName("alias".into())).unwrap(), None);
        assert_eq!(dict.resolve(&[id]).unwrap()[&id], TypeName("label".into()));
    }

    #[test]
    fn test_concurrent_overlapping_acquisition_yields_one_id_per_value() {
        let db = Arc::new(TermDatabase::in_memory());
        let words: Vec<String> = (0..50).map(|i| format!("word{i}")).collect();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let dict = TextDictionary::new(Arc::clone(&db));
                let mut values: Vec<Text> = words.iter().cloned().map(Text).collect();
                values.rotate_left(t * 5);
                thread::spawn(move || dict.acquire_ids(&values).unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(db.row_count::<Text>().unwrap(), words.len());
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
    }
}
