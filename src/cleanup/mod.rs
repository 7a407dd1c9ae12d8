//! Garbage collection of term rows no entity references.
//!
//! Cleanup is two-phase: a writer reports ids it stopped referencing, and
//! the cleaner later re-checks each one against every association table
//! before deleting it. A stale candidate is therefore harmless; the worst
//! case is an orphan that survives until the next pass.

mod backlog;
mod cleaner;
mod worker;

pub use backlog::CleanupBacklog;
pub use cleaner::{CleanupReport, DatabaseTermStoreCleaner, TermStoreCleaner};
pub use worker::{CleanupWorkerConfig, DeferredCleaner};
