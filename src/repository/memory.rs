//! Arena-backed repository: records live in vectors indexed by id. Used by tests and by embedders
//! that keep their own persistence.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{CommitOutcome, Repository};
use crate::error::PersistenceConflict;
use crate::types::{
    DisplayNames, FileId, FileRecord, InodeId, InodeRecord, NewFile, TitleId, TitleRecord, Verdict,
};

#[derive(Default)]
struct Arena {
    titles: Vec<TitleRecord>,
    files: Vec<FileRecord>,
    inodes: HashMap<InodeId, InodeRecord>,
}

impl Arena {
    fn file_mut(&mut self, id: FileId) -> Result<&mut FileRecord> {
        let idx = (id.0 as usize)
            .checked_sub(1)
            .ok_or_else(|| anyhow!("file {id} not found"))?;
        self.files
            .get_mut(idx)
            .ok_or_else(|| anyhow!("file {id} not found"))
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    arena: Mutex<Arena>,
    pings: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`Repository::ping`] calls so far.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Arena>> {
        self.arena
            .lock()
            .map_err(|_| anyhow!("memory repository lock poisoned"))
    }
}

impl Repository for MemoryRepository {
    fn file(&self, id: FileId) -> Result<Option<FileRecord>> {
        let arena = self.lock()?;
        Ok((id.0 as usize)
            .checked_sub(1)
            .and_then(|idx| arena.files.get(idx))
            .cloned())
    }

    fn inode(&self, id: InodeId) -> Result<Option<InodeRecord>> {
        Ok(self.lock()?.inodes.get(&id).cloned())
    }

    fn title(&self, id: TitleId) -> Result<Option<TitleRecord>> {
        let arena = self.lock()?;
        Ok((id.0 as usize)
            .checked_sub(1)
            .and_then(|idx| arena.titles.get(idx))
            .cloned())
    }

    fn title_by_catalog(&self, catalog_number: &str) -> Result<Option<TitleRecord>> {
        Ok(self
            .lock()?
            .titles
            .iter()
            .find(|t| t.catalog_number == catalog_number)
            .cloned())
    }

    fn file_by_inode_and_path(&self, inode_id: InodeId, path: &Path) -> Result<Option<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .iter()
            .find(|f| f.inode_id == inode_id && f.path == path)
            .cloned())
    }

    fn files_for_title(&self, title_id: TitleId) -> Result<Vec<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .iter()
            .filter(|f| f.title_id == title_id)
            .cloned()
            .collect())
    }

    fn checked_sibling(&self, inode_id: InodeId, exclude: FileId) -> Result<Option<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .iter()
            .find(|f| f.inode_id == inode_id && f.id != exclude && f.checked)
            .cloned())
    }

    fn insert_inode(&self, inode: &InodeRecord) -> Result<()> {
        self.lock()?
            .inodes
            .entry(inode.id)
            .or_insert_with(|| inode.clone());
        Ok(())
    }

    fn insert_title(&self, catalog_number: &str, names: &DisplayNames) -> Result<TitleRecord> {
        let mut arena = self.lock()?;
        if let Some(existing) = arena
            .titles
            .iter()
            .find(|t| t.catalog_number == catalog_number)
        {
            return Ok(existing.clone());
        }
        let title = TitleRecord {
            id: TitleId(arena.titles.len() as u64 + 1),
            catalog_number: catalog_number.to_string(),
            display_names: names.clone(),
        };
        arena.titles.push(title.clone());
        Ok(title)
    }

    fn insert_file(&self, file: &NewFile) -> Result<FileRecord> {
        let mut arena = self.lock()?;
        if !arena.inodes.contains_key(&file.inode_id) {
            return Err(anyhow!("inode {} not found", file.inode_id));
        }
        if arena
            .files
            .iter()
            .any(|f| f.inode_id == file.inode_id && f.path == file.path)
        {
            return Err(anyhow!(
                "file {} on inode {} already stored",
                file.path.display(),
                file.inode_id
            ));
        }
        let record = FileRecord {
            id: FileId(arena.files.len() as u64 + 1),
            title_id: file.title_id,
            filename: file.filename.clone(),
            path: file.path.clone(),
            part_index: file.part_index,
            inode_id: file.inode_id,
            checked: false,
            consistent: false,
            length_ms: None,
            last_error: None,
            version: 0,
            dispatched: false,
        };
        arena.files.push(record.clone());
        Ok(record)
    }

    fn commit_verdict(&self, id: FileId, verdict: &Verdict) -> Result<CommitOutcome> {
        let mut arena = self.lock()?;
        let file = arena.file_mut(id)?;
        if file.checked {
            return Ok(CommitOutcome::Conflict(PersistenceConflict { file_id: id }));
        }
        file.checked = verdict.checked;
        file.consistent = verdict.consistent;
        if verdict.length_ms.is_some() {
            file.length_ms = verdict.length_ms;
        }
        file.last_error = None;
        file.dispatched = false;
        file.version += 1;
        let committed = file.clone();
        if let Some(inode) = arena.inodes.get_mut(&committed.inode_id) {
            inode.checked = true;
        }
        Ok(CommitOutcome::Committed(committed))
    }

    fn mark_failed(&self, id: FileId, reason: &str) -> Result<CommitOutcome> {
        let mut arena = self.lock()?;
        let file = arena.file_mut(id)?;
        if file.checked {
            return Ok(CommitOutcome::Conflict(PersistenceConflict { file_id: id }));
        }
        file.last_error = Some(reason.to_string());
        file.version += 1;
        Ok(CommitOutcome::Committed(file.clone()))
    }

    fn reset_verdict(&self, id: FileId) -> Result<FileRecord> {
        let mut arena = self.lock()?;
        let file = arena.file_mut(id)?;
        file.checked = false;
        file.consistent = false;
        file.last_error = None;
        file.dispatched = false;
        file.version += 1;
        let reset = file.clone();
        if let Some(inode) = arena.inodes.get_mut(&reset.inode_id) {
            inode.checked = false;
        }
        Ok(reset)
    }

    fn update_display_names(&self, title_id: TitleId, names: &DisplayNames) -> Result<()> {
        let mut arena = self.lock()?;
        let title = (title_id.0 as usize)
            .checked_sub(1)
            .and_then(|idx| arena.titles.get_mut(idx))
            .ok_or_else(|| anyhow!("title {title_id} not found"))?;
        title.display_names = names.clone();
        Ok(())
    }

    fn set_dispatched(&self, id: FileId, dispatched: bool) -> Result<()> {
        self.lock()?.file_mut(id)?.dispatched = dispatched;
        Ok(())
    }

    fn unchecked_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .iter()
            .filter(|f| !f.checked)
            .cloned()
            .collect())
    }

    fn undispatched_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .iter()
            .filter(|f| f.checked && f.consistent && !f.dispatched)
            .cloned()
            .collect())
    }

    fn titles_with_inconsistent_files(&self) -> Result<Vec<TitleRecord>> {
        let arena = self.lock()?;
        Ok(arena
            .titles
            .iter()
            .filter(|t| {
                arena
                    .files
                    .iter()
                    .any(|f| f.title_id == t.id && f.checked && !f.consistent)
            })
            .cloned()
            .collect())
    }

    fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
