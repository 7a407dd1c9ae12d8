//! The term database: shared tables, row locks and the journal.
//!
//! # Lock order
//!
//! Every code path takes locks in this order and never the reverse:
//!
//! ```text
//! entity row lock
//!   -> association tables (Item, then Property)
//!     -> term_in_lang -> text_in_lang -> text -> term_type
//!       -> journal
//! ```
//!
//! Dictionary inserts hold their own table's write lock and read-lock the
//! parent tables below it to check foreign keys. The cleaner holds the
//! association read locks while it deletes, so a reference cannot appear
//! between its check and its delete.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::debug;

use crate::config::TermStoreConfig;
use crate::entity::{EntityId, EntityKind};
use crate::error::ValidationError;
use crate::ids::{TermInLangId, TextId, TextInLangId};

use super::records::{Mutation, TermInLang, Text, TextInLang, TypeName};
use super::row_lock::{RowLockGuard, RowLocks};
use super::tables::{AssociationTable, DictTable};
use super::traits::{lock_err, DictionaryRecord, Journal, NoJournal, StorageError};

const ASSOCIATION_TABLE: &str = "entity_terms";

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TermStoreStats {
    pub types: usize,
    pub texts: usize,
    pub texts_in_lang: usize,
    pub terms_in_lang: usize,
    pub associations: BTreeMap<EntityKind, usize>,
}

/// Shared storage for all term components.
///
/// Components receive an `Arc<TermDatabase>` through their constructors;
/// there is no process-wide instance.
pub struct TermDatabase {
    config: TermStoreConfig,
    pub(super) types: RwLock<DictTable<TypeName>>,
    pub(super) texts: RwLock<DictTable<Text>>,
    pub(super) texts_in_lang: RwLock<DictTable<TextInLang>>,
    pub(super) terms_in_lang: RwLock<DictTable<TermInLang>>,
    item_terms: RwLock<AssociationTable>,
    property_terms: RwLock<AssociationTable>,
    row_locks: RowLocks,
    journal: Arc<dyn Journal>,
}

impl TermDatabase {
    /// Creates an empty, non-durable database with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::build(TermStoreConfig::default(), Arc::new(NoJournal))
    }

    /// Creates an empty, non-durable database.
    pub fn new(config: TermStoreConfig) -> Result<Self, ValidationError> {
        Ok(Self::build(config.validate()?, Arc::new(NoJournal)))
    }

    /// Creates an empty database that records every mutation batch in `journal`.
    pub fn with_journal(
        config: TermStoreConfig,
        journal: Arc<dyn Journal>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::build(config.validate()?, journal))
    }

    fn build(config: TermStoreConfig, journal: Arc<dyn Journal>) -> Self {
        Self {
            config,
            types: RwLock::default(),
            texts: RwLock::default(),
            texts_in_lang: RwLock::default(),
            terms_in_lang: RwLock::default(),
            item_terms: RwLock::default(),
            property_terms: RwLock::default(),
            row_locks: RowLocks::new(),
            journal,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TermStoreConfig {
        &self.config
    }

    fn association_table(&self, kind: EntityKind) -> &RwLock<AssociationTable> {
        match kind {
            EntityKind::Item => &self.item_terms,
            EntityKind::Property => &self.property_terms,
        }
    }

    // ------------------------------------------------------------------
    // Dictionary tables
    // ------------------------------------------------------------------

    /// Looks up existing ids for `values`. Values without a row are absent from the result.
    pub fn select_ids<R: DictionaryRecord>(
        &self,
        values: &[R],
    ) -> Result<HashMap<R, R::Id>, StorageError> {
        let table = R::table(self).read().map_err(|_| lock_err(R::TABLE))?;
        Ok(values
            .iter()
            .filter_map(|v| table.id_of(v).map(|id| (v.clone(), id)))
            .collect())
    }

    /// Inserts rows for `values`, all or nothing.
    ///
    /// Fails with [`StorageError::DuplicateKey`] if any value already has a row
    /// (another writer won the race) and with [`StorageError::ForeignKeyViolation`]
    /// if a referenced parent row is gone. Nothing is written on failure.
    pub fn insert_new<R: DictionaryRecord>(
        &self,
        values: &[R],
    ) -> Result<HashMap<R, R::Id>, StorageError> {
        let mut table = R::table(self).write().map_err(|_| lock_err(R::TABLE))?;

        let mut seen = HashSet::with_capacity(values.len());
        let mut fresh: Vec<&R> = Vec::with_capacity(values.len());
        for value in values {
            if !seen.insert(value) {
                continue;
            }
            if table.id_of(value).is_some() {
                return Err(StorageError::DuplicateKey {
                    table: R::TABLE,
                    key: value.describe(),
                });
            }
            fresh.push(value);
        }
        if fresh.is_empty() {
            return Ok(HashMap::new());
        }

        R::verify_parents(&fresh, self)?;

        let assigned: Vec<(R::Id, &R)> = fresh.iter().map(|v| (table.allocate(), *v)).collect();
        let batch: Vec<Mutation> = assigned.iter().map(|(id, v)| v.insert_mutation(*id)).collect();
        self.journal.append(&batch)?;

        let mut out = HashMap::with_capacity(assigned.len());
        for (id, value) in assigned {
            table.insert(id, value.clone());
            out.insert(value.clone(), id);
        }
        debug!(table = R::TABLE, rows = out.len(), "inserted dictionary rows");
        Ok(out)
    }

    /// Fetches rows by id. Missing ids are absent from the result.
    pub fn rows<R: DictionaryRecord>(
        &self,
        ids: &[R::Id],
    ) -> Result<HashMap<R::Id, R>, StorageError> {
        let table = R::table(self).read().map_err(|_| lock_err(R::TABLE))?;
        Ok(ids
            .iter()
            .filter_map(|id| table.get(*id).map(|r| (*id, r.clone())))
            .collect())
    }

    /// Number of rows in a dictionary table.
    pub fn row_count<R: DictionaryRecord>(&self) -> Result<usize, StorageError> {
        Ok(R::table(self).read().map_err(|_| lock_err(R::TABLE))?.len())
    }

    pub(crate) fn require_rows<P: DictionaryRecord>(
        &self,
        child_table: &'static str,
        ids: &[P::Id],
    ) -> Result<(), StorageError> {
        let table = P::table(self).read().map_err(|_| lock_err(P::TABLE))?;
        match ids.iter().find(|id| !table.contains(**id)) {
            Some(missing) => Err(StorageError::ForeignKeyViolation {
                table: child_table,
                parent: P::TABLE,
                id: (*missing).into(),
            }),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Association tables
    // ------------------------------------------------------------------

    /// Takes the row lock of one entity, waiting at most `lock_wait_timeout`.
    pub fn lock_entity(
        &self,
        kind: EntityKind,
        entity: u64,
    ) -> Result<RowLockGuard<'_>, StorageError> {
        self.row_locks.lock(kind, entity, self.config.lock_wait_timeout())
    }

    /// Current term-in-language ids of one entity.
    pub fn association_ids(
        &self,
        kind: EntityKind,
        entity: u64,
    ) -> Result<BTreeSet<TermInLangId>, StorageError> {
        let table = self
            .association_table(kind)
            .read()
            .map_err(|_| lock_err("entity_terms.read"))?;
        Ok(table.term_ids(entity))
    }

    /// Applies one entity's association diff atomically.
    ///
    /// Every id in `insert` must name an existing term-in-language row at the
    /// moment the association table is write-locked; otherwise nothing is
    /// applied and [`StorageError::ForeignKeyViolation`] is returned.
    pub fn apply_association_change(
        &self,
        kind: EntityKind,
        entity: u64,
        insert: &[TermInLangId],
        remove: &[TermInLangId],
    ) -> Result<(), StorageError> {
        if insert.is_empty() && remove.is_empty() {
            return Ok(());
        }

        let mut table = self
            .association_table(kind)
            .write()
            .map_err(|_| lock_err("entity_terms.write"))?;

        if !insert.is_empty() {
            let terms = self
                .terms_in_lang
                .read()
                .map_err(|_| lock_err(TermInLang::TABLE))?;
            if let Some(missing) = insert.iter().find(|id| !terms.contains(**id)) {
                return Err(StorageError::ForeignKeyViolation {
                    table: ASSOCIATION_TABLE,
                    parent: TermInLang::TABLE,
                    id: missing.get(),
                });
            }
        }

        self.journal.append(&[Mutation::UpdateAssociations {
            kind,
            entity,
            insert: insert.to_vec(),
            remove: remove.to_vec(),
        }])?;
        table.apply(entity, insert, remove);
        Ok(())
    }

    /// Entities of any kind whose associations include `id`.
    pub fn entities_referencing(&self, id: TermInLangId) -> Result<Vec<EntityId>, StorageError> {
        let mut out = Vec::new();
        for kind in EntityKind::ALL {
            let table = self
                .association_table(kind)
                .read()
                .map_err(|_| lock_err("entity_terms.read"))?;
            let mut numeric: Vec<u64> = table.entities_referencing(id).collect();
            numeric.sort_unstable();
            out.extend(numeric.into_iter().map(|n| EntityId::new(kind, n)));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Opens a short cleanup transaction.
    ///
    /// Holds every association table read-locked and the three deletable
    /// dictionary tables write-locked until dropped. Keep it to one candidate.
    pub fn begin_cleanup(&self) -> Result<CleanupTxn<'_>, StorageError> {
        let item_terms = self.item_terms.read().map_err(|_| lock_err("entity_terms.read"))?;
        let property_terms = self
            .property_terms
            .read()
            .map_err(|_| lock_err("entity_terms.read"))?;
        let terms_in_lang = self
            .terms_in_lang
            .write()
            .map_err(|_| lock_err(TermInLang::TABLE))?;
        let texts_in_lang = self
            .texts_in_lang
            .write()
            .map_err(|_| lock_err(TextInLang::TABLE))?;
        let texts = self.texts.write().map_err(|_| lock_err(Text::TABLE))?;

        Ok(CleanupTxn {
            journal: self.journal.as_ref(),
            associations: [item_terms, property_terms],
            terms_in_lang,
            texts_in_lang,
            texts,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Row counts of every table.
    pub fn stats(&self) -> Result<TermStoreStats, StorageError> {
        let mut associations = BTreeMap::new();
        for kind in EntityKind::ALL {
            let table = self
                .association_table(kind)
                .read()
                .map_err(|_| lock_err("entity_terms.read"))?;
            associations.insert(kind, table.row_count());
        }
        Ok(TermStoreStats {
            types: self.row_count::<TypeName>()?,
            texts: self.row_count::<Text>()?,
            texts_in_lang: self.row_count::<TextInLang>()?,
            terms_in_lang: self.row_count::<TermInLang>()?,
            associations,
        })
    }

    /// Applies journaled batches without journaling them again. Used during recovery.
    #[cfg(any(test, feature = "persistent"))]
    pub(crate) fn replay(&self, batch: &[Mutation]) -> Result<(), StorageError> {
        for mutation in batch {
            match mutation.clone() {
                Mutation::InsertType { id, name } => {
                    self.types.write().map_err(|_| lock_err("replay"))?.insert(id, TypeName(name));
                }
                Mutation::InsertText { id, text } => {
                    self.texts.write().map_err(|_| lock_err("replay"))?.insert(id, Text(text));
                }
                Mutation::InsertTextInLang { id, language, text_id } => {
                    self.texts_in_lang
                        .write()
                        .map_err(|_| lock_err("replay"))?
                        .insert(id, TextInLang { language, text_id });
                }
                Mutation::InsertTermInLang {
                    id,
                    type_id,
                    text_in_lang_id,
                } => {
                    self.terms_in_lang.write().map_err(|_| lock_err("replay"))?.insert(
                        id,
                        TermInLang {
                            type_id,
                            text_in_lang_id,
                        },
                    );
                }
                Mutation::UpdateAssociations {
                    kind,
                    entity,
                    insert,
                    remove,
                } => {
                    self.association_table(kind)
                        .write()
                        .map_err(|_| lock_err("replay"))?
                        .apply(entity, &insert, &remove);
                }
                Mutation::DeleteTermInLang { id } => {
                    self.terms_in_lang.write().map_err(|_| lock_err("replay"))?.remove(id);
                }
                Mutation::DeleteTextInLang { id } => {
                    self.texts_in_lang.write().map_err(|_| lock_err("replay"))?.remove(id);
                }
                Mutation::DeleteText { id } => {
                    self.texts.write().map_err(|_| lock_err("replay"))?.remove(id);
                }
                Mutation::ReserveIds {
                    types,
                    texts,
                    texts_in_lang,
                    terms_in_lang,
                } => {
                    self.types.write().map_err(|_| lock_err("replay"))?.reserve(types);
                    self.texts.write().map_err(|_| lock_err("replay"))?.reserve(texts);
                    self.texts_in_lang
                        .write()
                        .map_err(|_| lock_err("replay"))?
                        .reserve(texts_in_lang);
                    self.terms_in_lang
                        .write()
                        .map_err(|_| lock_err("replay"))?
                        .reserve(terms_in_lang);
                }
            }
        }
        Ok(())
    }

    /// Runs `f` with every table write-locked and a snapshot of the full
    /// state expressed as insert mutations (parents before children).
    ///
    /// No mutation can be journaled while `f` runs, so `f` may replace the
    /// journal contents with the snapshot.
    #[cfg(any(test, feature = "persistent"))]
    pub(crate) fn with_quiesced_snapshot<T>(
        &self,
        f: impl FnOnce(Vec<Mutation>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let item_terms = self.item_terms.write().map_err(|_| lock_err("snapshot"))?;
        let property_terms = self.property_terms.write().map_err(|_| lock_err("snapshot"))?;
        let terms_in_lang = self.terms_in_lang.write().map_err(|_| lock_err("snapshot"))?;
        let texts_in_lang = self.texts_in_lang.write().map_err(|_| lock_err("snapshot"))?;
        let texts = self.texts.write().map_err(|_| lock_err("snapshot"))?;
        let types = self.types.write().map_err(|_| lock_err("snapshot"))?;

        let mut snapshot = vec![Mutation::ReserveIds {
            types: types.next_id(),
            texts: texts.next_id(),
            texts_in_lang: texts_in_lang.next_id(),
            terms_in_lang: terms_in_lang.next_id(),
        }];
        snapshot.extend(types.iter().map(|(id, r)| r.insert_mutation(id)));
        snapshot.extend(texts.iter().map(|(id, r)| r.insert_mutation(id)));
        snapshot.extend(texts_in_lang.iter().map(|(id, r)| r.insert_mutation(id)));
        snapshot.extend(terms_in_lang.iter().map(|(id, r)| r.insert_mutation(id)));
        let tables = [
            (EntityKind::Item, &item_terms),
            (EntityKind::Property, &property_terms),
        ];
        for (kind, table) in tables {
            let mut entities: Vec<_> = table.iter().collect();
            entities.sort_unstable_by_key(|(entity, _)| *entity);
            snapshot.extend(entities.into_iter().map(|(entity, ids)| Mutation::UpdateAssociations {
                kind,
                entity,
                insert: ids.iter().copied().collect(),
                remove: Vec::new(),
            }));
        }

        f(snapshot)
    }
}

/// A single cleanup critical section. See [`TermDatabase::begin_cleanup`].
pub struct CleanupTxn<'a> {
    journal: &'a dyn Journal,
    associations: [RwLockReadGuard<'a, AssociationTable>; 2],
    terms_in_lang: RwLockWriteGuard<'a, DictTable<TermInLang>>,
    texts_in_lang: RwLockWriteGuard<'a, DictTable<TextInLang>>,
    texts: RwLockWriteGuard<'a, DictTable<Text>>,
}

impl CleanupTxn<'_> {
    /// Returns true if any entity of any kind references the term.
    #[must_use]
    pub fn is_term_in_lang_referenced(&self, id: TermInLangId) -> bool {
        self.associations.iter().any(|table| table.is_referenced(id))
    }

    #[must_use]
    pub fn term_in_lang(&self, id: TermInLangId) -> Option<TermInLang> {
        self.terms_in_lang.get(id).copied()
    }

    /// Deletes a term-in-language row. Callers check references first.
    pub fn delete_term_in_lang(
        &mut self,
        id: TermInLangId,
    ) -> Result<Option<TermInLang>, StorageError> {
        debug_assert!(!self.is_term_in_lang_referenced(id));
        if !self.terms_in_lang.contains(id) {
            return Ok(None);
        }
        self.journal.append(&[Mutation::DeleteTermInLang { id }])?;
        Ok(self.terms_in_lang.remove(id))
    }

    /// Returns true if any term-in-language row still uses the text-in-language.
    #[must_use]
    pub fn is_text_in_lang_referenced(&self, id: TextInLangId) -> bool {
        self.terms_in_lang.references_parent(id.get())
    }

    pub fn delete_text_in_lang(
        &mut self,
        id: TextInLangId,
    ) -> Result<Option<TextInLang>, StorageError> {
        debug_assert!(!self.is_text_in_lang_referenced(id));
        if !self.texts_in_lang.contains(id) {
            return Ok(None);
        }
        self.journal.append(&[Mutation::DeleteTextInLang { id }])?;
        Ok(self.texts_in_lang.remove(id))
    }

    /// Returns true if any text-in-language row still uses the text.
    #[must_use]
    pub fn is_text_referenced(&self, id: TextId) -> bool {
        self.texts_in_lang.references_parent(id.get())
    }

    pub fn delete_text(&mut self, id: TextId) -> Result<Option<Text>, StorageError> {
        debug_assert!(!self.is_text_referenced(id));
        if !self.texts.contains(id) {
            return Ok(None);
        }
        self.journal.append(&[Mutation::DeleteText { id }])?;
        Ok(self.texts.remove(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TypeId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingJournal {
        batches: Mutex<Vec<Vec<Mutation>>>,
    }

    impl Journal for RecordingJournal {
        fn append(&self, batch: &[Mutation]) -> Result<(), StorageError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    struct FailingJournal;

    impl Journal for FailingJournal {
        fn append(&self, _batch: &[Mutation]) -> Result<(), StorageError> {
            Err(StorageError::JournalError("disk full".to_string()))
        }
    }

    fn text(s: &str) -> Text {
        Text(s.to_string())
    }

    #[test]
    fn test_insert_new_then_select() {
        let db = TermDatabase::in_memory();
        let inserted = db.insert_new(&[text("cat"), text("dog"), text("cat")]).unwrap();
        assert_eq!(inserted.len(), 2);

        let selected = db.select_ids(&[text("cat"), text("bird")]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[&text("cat")], inserted[&text("cat")]);
    }

    #[test]
    fn test_insert_new_duplicate_writes_nothing() {
        let db = TermDatabase::in_memory();
        db.insert_new(&[text("cat")]).unwrap();

        let err = db.insert_new(&[text("dog"), text("cat")]).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { table: "text", .. }));
        assert_eq!(db.row_count::<Text>().unwrap(), 1);
    }

    #[test]
    fn test_insert_checks_foreign_keys() {
        let db = TermDatabase::in_memory();
        let orphan = TextInLang {
            language: "en".to_string(),
            text_id: TextId::new(99),
        };
        let err = db.insert_new(&[orphan]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ForeignKeyViolation {
                table: "text_in_lang",
                parent: "text",
                id: 99
            }
        ));
    }

    #[test]
    fn test_association_insert_requires_term_row() {
        let db = TermDatabase::in_memory();
        let err = db
            .apply_association_change(EntityKind::Item, 1, &[TermInLangId::new(5)], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation { .. }));
        assert!(db.association_ids(EntityKind::Item, 1).unwrap().is_empty());
    }

    #[test]
    fn test_journal_failure_leaves_state_untouched() {
        let journal = Arc::new(FailingJournal);
        let db = TermDatabase::with_journal(TermStoreConfig::default(), journal).unwrap();
        let err = db.insert_new(&[text("cat")]).unwrap_err();
        assert!(matches!(err, StorageError::JournalError(_)));
        assert_eq!(db.row_count::<Text>().unwrap(), 0);
    }

    #[test]
    fn test_mutations_are_journaled_in_batches() {
        let journal = Arc::new(RecordingJournal::default());
        let db = TermDatabase::with_journal(TermStoreConfig::default(), journal.clone()).unwrap();
        db.insert_new(&[text("a"), text("b")]).unwrap();
        db.insert_new(&[TypeName("label".to_string())]).unwrap();

        let batches = journal.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert!(matches!(batches[1][0], Mutation::InsertType { .. }));
    }

    #[test]
    fn test_replay_rebuilds_state() {
        let batch = vec![
            Mutation::InsertType {
                id: TypeId::new(1),
                name: "label".to_string(),
            },
            Mutation::InsertText {
                id: TextId::new(1),
                text: "cat".to_string(),
            },
            Mutation::InsertTextInLang {
                id: TextInLangId::new(1),
                language: "en".to_string(),
                text_id: TextId::new(1),
            },
            Mutation::InsertTermInLang {
                id: TermInLangId::new(1),
                type_id: TypeId::new(1),
                text_in_lang_id: TextInLangId::new(1),
            },
            Mutation::UpdateAssociations {
                kind: EntityKind::Property,
                entity: 1,
                insert: vec![TermInLangId::new(1)],
                remove: Vec::new(),
            },
        ];
        let db = TermDatabase::in_memory();
        db.replay(&batch).unwrap();
        db.replay(&batch).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.terms_in_lang, 1);
        assert_eq!(stats.associations[&EntityKind::Property], 1);
        // Allocation continues after replayed ids.
        let fresh = db.insert_new(&[text("dog")]).unwrap();
        assert_eq!(fresh[&text("dog")], TextId::new(2));
    }

    #[test]
    fn test_snapshot_orders_parents_first() {
        let db = TermDatabase::in_memory();
        let t = db.insert_new(&[text("cat")]).unwrap()[&text("cat")];
        db.insert_new(&[TextInLang {
            language: "en".to_string(),
            text_id: t,
        }])
        .unwrap();

        let snapshot = db.with_quiesced_snapshot(Ok).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(matches!(snapshot[0], Mutation::ReserveIds { .. }));
        assert!(matches!(snapshot[1], Mutation::InsertText { .. }));
        assert!(matches!(snapshot[2], Mutation::InsertTextInLang { .. }));
    }

    #[test]
    fn test_snapshot_replay_keeps_deleted_ids_retired() {
        let db = TermDatabase::in_memory();
        db.insert_new(&[text("a"), text("b")]).unwrap();
        db.begin_cleanup().unwrap().delete_text(TextId::new(2)).unwrap();
        let snapshot = db.with_quiesced_snapshot(Ok).unwrap();

        let restored = TermDatabase::in_memory();
        restored.replay(&snapshot).unwrap();
        let fresh = restored.insert_new(&[text("c")]).unwrap();
        assert_eq!(fresh[&text("c")], TextId::new(3));
    }
}
