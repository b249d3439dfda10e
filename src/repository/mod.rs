//! Storage collaborator consumed by the resolver and the orchestrator.
//!
//! The core never owns record lifetime: it reads records by id and asks the repository to apply
//! decisions. Verdict writes are compare-and-swap on `checked`, so concurrent workers cannot both
//! commit a verdict for the same file.

mod memory;

pub use memory::MemoryRepository;

use anyhow::Result;
use std::path::Path;

use crate::error::PersistenceConflict;
use crate::types::{
    DisplayNames, FileId, FileRecord, InodeId, InodeRecord, NewFile, TitleId, TitleRecord, Verdict,
};

/// Result of a guarded verdict or failure write.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitOutcome {
    /// Write applied; the stored record after the write.
    Committed(FileRecord),
    /// The file already carries a committed verdict.
    Conflict(PersistenceConflict),
}

pub trait Repository: Send + Sync {
    fn file(&self, id: FileId) -> Result<Option<FileRecord>>;

    fn inode(&self, id: InodeId) -> Result<Option<InodeRecord>>;

    fn title(&self, id: TitleId) -> Result<Option<TitleRecord>>;

    fn title_by_catalog(&self, catalog_number: &str) -> Result<Option<TitleRecord>>;

    fn file_by_inode_and_path(&self, inode_id: InodeId, path: &Path) -> Result<Option<FileRecord>>;

    fn files_for_title(&self, title_id: TitleId) -> Result<Vec<FileRecord>>;

    /// A checked file on `inode_id` other than `exclude` (hard-link sibling), if any.
    fn checked_sibling(&self, inode_id: InodeId, exclude: FileId) -> Result<Option<FileRecord>>;

    /// Insert an inode; an existing row with the same id is left untouched.
    fn insert_inode(&self, inode: &InodeRecord) -> Result<()>;

    /// Insert a title, or return the stored one when the catalog number is taken.
    fn insert_title(&self, catalog_number: &str, names: &DisplayNames) -> Result<TitleRecord>;

    fn insert_file(&self, file: &NewFile) -> Result<FileRecord>;

    /// Persist `verdict` if the file is still unchecked; marks the inode checked in the same write.
    fn commit_verdict(&self, id: FileId, verdict: &Verdict) -> Result<CommitOutcome>;

    /// Record a failed attempt on a still-unchecked file. The file stays retryable.
    fn mark_failed(&self, id: FileId, reason: &str) -> Result<CommitOutcome>;

    /// Clear the verdict of a file and its inode so the file is verified again.
    fn reset_verdict(&self, id: FileId) -> Result<FileRecord>;

    fn update_display_names(&self, title_id: TitleId, names: &DisplayNames) -> Result<()>;

    /// Record whether the fan-out of a consistent file is out. Cleared when a delivery is lost.
    fn set_dispatched(&self, id: FileId, dispatched: bool) -> Result<()>;

    /// Files without a committed verdict, including failed ones.
    fn unchecked_files(&self) -> Result<Vec<FileRecord>>;

    /// Consistent files whose fan-out was never published or was lost afterwards.
    fn undispatched_files(&self) -> Result<Vec<FileRecord>>;

    /// Titles owning at least one checked, inconsistent file.
    fn titles_with_inconsistent_files(&self) -> Result<Vec<TitleRecord>>;

    /// Cheap liveness round-trip on the storage connection.
    fn ping(&self) -> Result<()>;
}
