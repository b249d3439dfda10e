//! Duplicate resolution for observed files: same inode + same path is the same file, a
//! catalog number seen before belongs to the same title.

use anyhow::Result;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

use crate::repository::Repository;
use crate::types::{
    DisplayNames, FileRecord, Identity, InodeId, InodeRecord, NewFile, TitleRecord,
};

/// What storage already knows about an observed file.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Only set when both inode and path match a stored file.
    pub existing_file: Option<FileRecord>,
    pub existing_title: Option<TitleRecord>,
    /// Inode to create; set only when the inode is not stored yet.
    pub new_inode: Option<InodeRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Registration {
    /// The file was already stored.
    Known(FileRecord),
    New {
        file: FileRecord,
        /// True when the title was created for this file.
        new_title: bool,
    },
}

impl Registration {
    pub fn file(&self) -> &FileRecord {
        match self {
            Registration::Known(file) | Registration::New { file, .. } => file,
        }
    }
}

pub struct DuplicateResolver {
    repo: Arc<dyn Repository>,
}

impl DuplicateResolver {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Look up what is already stored for this file. Writes nothing.
    pub fn resolve(
        &self,
        path: &Path,
        inode_id: InodeId,
        file_size: u64,
        identity: &Identity,
    ) -> Result<Resolution> {
        let inode = self.repo.inode(inode_id)?;
        let existing_file = match inode {
            Some(_) => self.repo.file_by_inode_and_path(inode_id, path)?,
            None => None,
        };
        let new_inode = inode.is_none().then_some(InodeRecord {
            id: inode_id,
            filesize: file_size,
            checked: false,
        });
        let existing_title = self.repo.title_by_catalog(&identity.catalog_number)?;
        Ok(Resolution {
            existing_file,
            existing_title,
            new_inode,
        })
    }

    /// Resolve, then create whatever is missing (inode, title, file).
    pub fn register(
        &self,
        path: &Path,
        inode_id: InodeId,
        file_size: u64,
        identity: &Identity,
    ) -> Result<Registration> {
        let resolution = self.resolve(path, inode_id, file_size, identity)?;
        if let Some(file) = resolution.existing_file {
            debug!("{} already registered as file {}", path.display(), file.id);
            return Ok(Registration::Known(file));
        }
        if let Some(inode) = &resolution.new_inode {
            debug!("Inode {} not found, creating it", inode.id);
            self.repo.insert_inode(inode)?;
        }
        let (title, new_title) = match resolution.existing_title {
            Some(title) => (title, false),
            None => {
                info!("New title {}", identity.catalog_number);
                let title = self
                    .repo
                    .insert_title(&identity.catalog_number, &DisplayNames::default())?;
                (title, true)
            }
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = self.repo.insert_file(&NewFile {
            title_id: title.id,
            filename,
            path: path.to_path_buf(),
            part_index: identity.part_index,
            inode_id,
        })?;
        info!("Registered {} as {}", path.display(), identity);
        Ok(Registration::New { file, new_title })
    }
}
