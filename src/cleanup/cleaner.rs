use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{TermStoreError, TermStoreResult};
use crate::ids::{TermInLangId, TextId, TextInLangId};
use crate::storage::{StorageError, TermDatabase};

/// Deletes term-in-language rows that no entity references any more.
pub trait TermStoreCleaner: Send + Sync {
    /// Re-checks every candidate and deletes the unreferenced ones,
    /// cascading to text-in-language and text rows left without users.
    ///
    /// # Errors
    /// `CleanupIncomplete` with the candidates not yet processed.
    fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport>;
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_terms_in_lang: Vec<TermInLangId>,
    pub deleted_texts_in_lang: Vec<TextInLangId>,
    pub deleted_texts: Vec<TextId>,
    /// Candidates an entity still (or again) references.
    pub still_referenced: Vec<TermInLangId>,
    /// Candidates whose row was already gone.
    pub already_gone: Vec<TermInLangId>,
    /// Candidates handed to a background worker or backlog.
    pub deferred: Vec<TermInLangId>,
}

impl CleanupReport {
    /// Appends another report's lists to this one.
    pub fn merge(&mut self, other: Self) {
        self.deleted_terms_in_lang.extend(other.deleted_terms_in_lang);
        self.deleted_texts_in_lang.extend(other.deleted_texts_in_lang);
        self.deleted_texts.extend(other.deleted_texts);
        self.still_referenced.extend(other.still_referenced);
        self.already_gone.extend(other.already_gone);
        self.deferred.extend(other.deferred);
    }

    #[must_use]
    pub fn deleted_rows(&self) -> usize {
        self.deleted_terms_in_lang.len()
            + self.deleted_texts_in_lang.len()
            + self.deleted_texts.len()
    }
}

/// Cleaner that works directly on the database, one candidate per critical section.
#[derive(Clone)]
pub struct DatabaseTermStoreCleaner {
    db: Arc<TermDatabase>,
}

impl DatabaseTermStoreCleaner {
    #[must_use]
    pub fn new(db: Arc<TermDatabase>) -> Self {
        Self { db }
    }

    fn clean_one(&self, id: TermInLangId, report: &mut CleanupReport) -> Result<(), StorageError> {
        let mut txn = self.db.begin_cleanup()?;

        if txn.is_term_in_lang_referenced(id) {
            report.still_referenced.push(id);
            return Ok(());
        }
        let Some(term) = txn.delete_term_in_lang(id)? else {
            report.already_gone.push(id);
            return Ok(());
        };
        report.deleted_terms_in_lang.push(id);

        let til_id = term.text_in_lang_id;
        if txn.is_text_in_lang_referenced(til_id) {
            return Ok(());
        }
        let Some(til) = txn.delete_text_in_lang(til_id)? else {
            return Ok(());
        };
        report.deleted_texts_in_lang.push(til_id);

        if !txn.is_text_referenced(til.text_id) && txn.delete_text(til.text_id)?.is_some() {
            report.deleted_texts.push(til.text_id);
        }
        Ok(())
    }
}

impl TermStoreCleaner for DatabaseTermStoreCleaner {
    fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
        let candidates: Vec<TermInLangId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut report = CleanupReport::default();

        for (position, id) in candidates.iter().enumerate() {
            if let Err(err) = self.clean_one(*id, &mut report) {
                let remaining = candidates[position..].to_vec();
                warn!(
                    term_in_lang = %id,
                    remaining = remaining.len(),
                    error = %err,
                    "term cleanup stopped"
                );
                return Err(TermStoreError::CleanupIncomplete {
                    remaining,
                    reason: err.to_string(),
                });
            }
        }

        debug!(
            candidates = candidates.len(),
            deleted = report.deleted_rows(),
            still_referenced = report.still_referenced.len(),
            "term cleanup finished"
        );
        Ok(report)
    }
}
