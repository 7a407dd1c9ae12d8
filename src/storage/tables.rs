//! In-memory table structures.
//!
//! These types hold no locks of their own; the database wraps each one in a
//! `RwLock` and enforces the lock order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ids::TermInLangId;

use super::traits::DictionaryRecord;

/// A dictionary table: id-keyed rows plus a unique index on the value.
///
/// `parent_refs` counts, per cascade parent id, how many rows of this table
/// point at it. The cleaner uses it to decide whether a parent became orphaned.
#[derive(Debug)]
pub struct DictTable<R: DictionaryRecord> {
    rows: BTreeMap<R::Id, R>,
    index: HashMap<R, R::Id>,
    parent_refs: HashMap<u64, usize>,
    next_id: u64,
}

impl<R: DictionaryRecord> Default for DictTable<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: HashMap::new(),
            parent_refs: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<R: DictionaryRecord> DictTable<R> {
    pub(crate) fn id_of(&self, value: &R) -> Option<R::Id> {
        self.index.get(value).copied()
    }

    pub(crate) fn get(&self, id: R::Id) -> Option<&R> {
        self.rows.get(&id)
    }

    pub(crate) fn contains(&self, id: R::Id) -> bool {
        self.rows.contains_key(&id)
    }

    /// Reserves the next id. Ids are never handed out twice, even if the
    /// insert that reserved one is abandoned.
    pub(crate) fn allocate(&mut self) -> R::Id {
        let id = self.next_id;
        self.next_id += 1;
        R::Id::from(id)
    }

    /// Inserts a row under a known id. Replaying an identical row is a no-op.
    pub(crate) fn insert(&mut self, id: R::Id, value: R) {
        let raw: u64 = id.into();
        self.next_id = self.next_id.max(raw + 1);
        if self.rows.contains_key(&id) {
            return;
        }
        if let Some(parent) = value.cascade_parent() {
            *self.parent_refs.entry(parent).or_insert(0) += 1;
        }
        self.index.insert(value.clone(), id);
        self.rows.insert(id, value);
    }

    /// The id the next insert will receive.
    #[cfg(any(test, feature = "persistent"))]
    pub(crate) const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Makes sure no id below `next` is handed out again.
    #[cfg(any(test, feature = "persistent"))]
    pub(crate) fn reserve(&mut self, next: u64) {
        self.next_id = self.next_id.max(next);
    }

    pub(crate) fn remove(&mut self, id: R::Id) -> Option<R> {
        let value = self.rows.remove(&id)?;
        self.index.remove(&value);
        if let Some(parent) = value.cascade_parent() {
            if let Some(count) = self.parent_refs.get_mut(&parent) {
                *count -= 1;
                if *count == 0 {
                    self.parent_refs.remove(&parent);
                }
            }
        }
        Some(value)
    }

    /// Returns true if any row of this table references `parent` as its cascade parent.
    pub(crate) fn references_parent(&self, parent: u64) -> bool {
        self.parent_refs.contains_key(&parent)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(any(test, feature = "persistent"))]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (R::Id, &R)> {
        self.rows.iter().map(|(id, r)| (*id, r))
    }
}

/// Association rows of one entity kind.
///
/// Keyed both ways: by entity for fingerprint reads and diffs, and by
/// term-in-language id for reference checks and reverse lookups.
#[derive(Debug, Default)]
pub struct AssociationTable {
    by_entity: HashMap<u64, BTreeSet<TermInLangId>>,
    by_term: HashMap<TermInLangId, BTreeSet<u64>>,
    rows: usize,
}

impl AssociationTable {
    pub(crate) fn term_ids(&self, entity: u64) -> BTreeSet<TermInLangId> {
        self.by_entity.get(&entity).cloned().unwrap_or_default()
    }

    pub(crate) fn is_referenced(&self, id: TermInLangId) -> bool {
        self.by_term.contains_key(&id)
    }

    pub(crate) fn entities_referencing(&self, id: TermInLangId) -> impl Iterator<Item = u64> + '_ {
        self.by_term.get(&id).into_iter().flatten().copied()
    }

    /// Applies a diff for one entity. Inserting an existing pair or removing
    /// a missing one changes nothing, so replays are idempotent.
    pub(crate) fn apply(&mut self, entity: u64, insert: &[TermInLangId], remove: &[TermInLangId]) {
        let set = self.by_entity.entry(entity).or_default();
        for id in remove {
            if set.remove(id) {
                self.rows -= 1;
                if let Some(entities) = self.by_term.get_mut(id) {
                    entities.remove(&entity);
                    if entities.is_empty() {
                        self.by_term.remove(id);
                    }
                }
            }
        }
        for id in insert {
            if set.insert(*id) {
                self.rows += 1;
                self.by_term.entry(*id).or_default().insert(entity);
            }
        }
        if set.is_empty() {
            self.by_entity.remove(&entity);
        }
    }

    pub(crate) fn row_count(&self) -> usize {
        self.rows
    }

    #[cfg(any(test, feature = "persistent"))]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &BTreeSet<TermInLangId>)> {
        self.by_entity.iter().map(|(e, ids)| (*e, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TextId, TextInLangId};
    use crate::storage::records::{Text, TextInLang};

    fn til(lang: &str, text: u64) -> TextInLang {
        TextInLang {
            language: lang.to_string(),
            text_id: TextId::new(text),
        }
    }

    #[test]
    fn test_dict_table_unique_index_and_ids() {
        let mut table: DictTable<Text> = DictTable::default();
        let id = table.allocate();
        table.insert(id, Text("cat".to_string()));
        assert_eq!(table.id_of(&Text("cat".to_string())), Some(id));
        assert_eq!(table.allocate(), TextId::new(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_with_explicit_id_advances_allocator() {
        let mut table: DictTable<Text> = DictTable::default();
        table.insert(TextId::new(10), Text("x".to_string()));
        assert_eq!(table.allocate(), TextId::new(11));
    }

    #[test]
    fn test_parent_refs_follow_inserts_and_removes() {
        let mut table: DictTable<TextInLang> = DictTable::default();
        table.insert(TextInLangId::new(1), til("en", 5));
        table.insert(TextInLangId::new(2), til("de", 5));
        assert!(table.references_parent(5));

        table.remove(TextInLangId::new(1));
        assert!(table.references_parent(5));
        table.remove(TextInLangId::new(2));
        assert!(!table.references_parent(5));
        assert_eq!(table.id_of(&til("de", 5)), None);
    }

    #[test]
    fn test_association_apply_is_idempotent() {
        let mut table = AssociationTable::default();
        let a = TermInLangId::new(1);
        let b = TermInLangId::new(2);

        table.apply(7, &[a, b], &[]);
        table.apply(7, &[a, b], &[]);
        assert_eq!(table.row_count(), 2);

        table.apply(7, &[], &[a, a]);
        assert_eq!(table.row_count(), 1);
        assert!(!table.is_referenced(a));
        assert!(table.is_referenced(b));

        table.apply(7, &[], &[b]);
        assert_eq!(table.row_count(), 0);
        assert!(table.term_ids(7).is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut table = AssociationTable::default();
        let shared = TermInLangId::new(3);
        table.apply(1, &[shared], &[]);
        table.apply(2, &[shared], &[]);
        let mut entities: Vec<u64> = table.entities_referencing(shared).collect();
        entities.sort_unstable();
        assert_eq!(entities, vec![1, 2]);
    }
}
