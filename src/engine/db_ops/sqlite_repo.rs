//! [`Repository`] over a single rusqlite connection.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{FILE_COLUMNS, open_db, open_db_in_memory};
use crate::engine::tools::path_to_db_string;
use crate::error::PersistenceConflict;
use crate::pipeline::DownstreamSink;
use crate::repository::{CommitOutcome, Repository};
use crate::types::{
    DisplayNames, FileId, FileRecord, InodeId, InodeRecord, NewFile, Task, TitleId, TitleRecord,
    Verdict,
};

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the catalog at `path`. Open one repository per worker for parallel commits.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Downstream tasks recorded by [`DownstreamSink::accept`], oldest first.
    pub fn pending_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM pending_tasks ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for payload in rows {
            let payload = payload?;
            tasks.push(serde_json::from_str(&payload).context("decode pending task")?);
        }
        Ok(tasks)
    }

    fn file_where(&self, clause: &str, params: impl rusqlite::Params) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE {clause} LIMIT 1");
        conn.query_row(&sql, params, row_to_file)
            .optional()
            .context("query file")
    }

    fn files_where(&self, clause: &str, params: impl rusqlite::Params) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("query files")
    }
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(3)?;
    Ok(FileRecord {
        id: FileId(row.get::<_, i64>(0)? as u64),
        title_id: TitleId(row.get::<_, i64>(1)? as u64),
        filename: row.get(2)?,
        path: PathBuf::from(path),
        part_index: row.get::<_, i64>(4)?.max(1) as u32,
        inode_id: InodeId(row.get::<_, i64>(5)? as u64),
        checked: row.get(6)?,
        consistent: row.get(7)?,
        length_ms: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
        last_error: row.get(9)?,
        version: row.get::<_, i64>(10)?.max(0) as u64,
        dispatched: row.get(11)?,
    })
}

fn row_to_title(row: &Row<'_>) -> rusqlite::Result<(TitleId, String, String)> {
    Ok((
        TitleId(row.get::<_, i64>(0)? as u64),
        row.get(1)?,
        row.get(2)?,
    ))
}

fn decode_title((id, catalog_number, names): (TitleId, String, String)) -> Result<TitleRecord> {
    let display_names = serde_json::from_str(&names)
        .with_context(|| format!("decode display names of title {catalog_number}"))?;
    Ok(TitleRecord {
        id,
        catalog_number,
        display_names,
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Repository for SqliteRepository {
    fn file(&self, id: FileId) -> Result<Option<FileRecord>> {
        self.file_where("id = ?1", [id.0 as i64])
    }

    fn inode(&self, id: InodeId) -> Result<Option<InodeRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, filesize, checked FROM inodes WHERE id = ?1",
            [id.0 as i64],
            |row| {
                Ok(InodeRecord {
                    id: InodeId(row.get::<_, i64>(0)? as u64),
                    filesize: row.get::<_, i64>(1)?.max(0) as u64,
                    checked: row.get(2)?,
                })
            },
        )
        .optional()
        .context("query inode")
    }

    fn title(&self, id: TitleId) -> Result<Option<TitleRecord>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, catalog_number, display_names FROM titles WHERE id = ?1",
                [id.0 as i64],
                row_to_title,
            )
            .optional()
            .context("query title")?
        };
        row.map(decode_title).transpose()
    }

    fn title_by_catalog(&self, catalog_number: &str) -> Result<Option<TitleRecord>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, catalog_number, display_names FROM titles WHERE catalog_number = ?1",
                [catalog_number],
                row_to_title,
            )
            .optional()
            .context("query title by catalog number")?
        };
        row.map(decode_title).transpose()
    }

    fn file_by_inode_and_path(&self, inode_id: InodeId, path: &Path) -> Result<Option<FileRecord>> {
        self.file_where(
            "inode_id = ?1 AND path = ?2",
            params![inode_id.0 as i64, path_to_db_string(path)],
        )
    }

    fn files_for_title(&self, title_id: TitleId) -> Result<Vec<FileRecord>> {
        self.files_where("title_id = ?1", [title_id.0 as i64])
    }

    fn checked_sibling(&self, inode_id: InodeId, exclude: FileId) -> Result<Option<FileRecord>> {
        self.file_where(
            "inode_id = ?1 AND id != ?2 AND checked = 1",
            params![inode_id.0 as i64, exclude.0 as i64],
        )
    }

    fn insert_inode(&self, inode: &InodeRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO inodes (id, filesize, checked) VALUES (?1, ?2, ?3)",
            params![inode.id.0 as i64, inode.filesize as i64, inode.checked],
        )
        .context("insert inode")?;
        Ok(())
    }

    fn insert_title(&self, catalog_number: &str, names: &DisplayNames) -> Result<TitleRecord> {
        let names_json = serde_json::to_string(names).context("encode display names")?;
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO titles (catalog_number, display_names) VALUES (?1, ?2)",
                params![catalog_number, names_json],
            )
            .context("insert title")?;
        }
        self.title_by_catalog(catalog_number)?
            .ok_or_else(|| anyhow!("title {catalog_number} missing after insert"))
    }

    fn insert_file(&self, file: &NewFile) -> Result<FileRecord> {
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO files (title_id, filename, path, part_index, inode_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    file.title_id.0 as i64,
                    file.filename,
                    path_to_db_string(&file.path),
                    file.part_index as i64,
                    file.inode_id.0 as i64,
                ],
            )
            .with_context(|| format!("insert file {}", file.path.display()))?;
            FileId(conn.last_insert_rowid() as u64)
        };
        self.file(id)?
            .ok_or_else(|| anyhow!("file {id} missing after insert"))
    }

    fn commit_verdict(&self, id: FileId, verdict: &Verdict) -> Result<CommitOutcome> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction().context("begin verdict transaction")?;
            let changed = tx
                .execute(
                    "UPDATE files SET checked = ?2, consistent = ?3, length_ms = COALESCE(?4, length_ms), \
                     last_error = NULL, dispatched = 0, version = version + 1 WHERE id = ?1 AND checked = 0",
                    params![
                        id.0 as i64,
                        verdict.checked,
                        verdict.consistent,
                        verdict.length_ms.map(|v| v as i64),
                    ],
                )
                .context("write verdict")?;
            if changed == 0 {
                let exists: bool = tx
                    .query_row("SELECT EXISTS(SELECT 1 FROM files WHERE id = ?1)", [id.0 as i64], |r| r.get(0))
                    .context("look up file")?;
                if !exists {
                    return Err(anyhow!("file {id} not found"));
                }
                return Ok(CommitOutcome::Conflict(PersistenceConflict { file_id: id }));
            }
            tx.execute(
                "UPDATE inodes SET checked = 1 WHERE id = (SELECT inode_id FROM files WHERE id = ?1)",
                [id.0 as i64],
            )
            .context("mark inode checked")?;
            tx.commit().context("commit verdict")?;
        }
        let committed = self
            .file(id)?
            .ok_or_else(|| anyhow!("file {id} missing after verdict"))?;
        Ok(CommitOutcome::Committed(committed))
    }

    fn mark_failed(&self, id: FileId, reason: &str) -> Result<CommitOutcome> {
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE files SET last_error = ?2, version = version + 1 WHERE id = ?1 AND checked = 0",
                params![id.0 as i64, reason],
            )
            .context("record failure")?
        };
        let file = self
            .file(id)?
            .ok_or_else(|| anyhow!("file {id} not found"))?;
        if changed == 0 {
            return Ok(CommitOutcome::Conflict(PersistenceConflict { file_id: id }));
        }
        Ok(CommitOutcome::Committed(file))
    }

    fn reset_verdict(&self, id: FileId) -> Result<FileRecord> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction().context("begin reset transaction")?;
            tx.execute(
                "UPDATE files SET checked = 0, consistent = 0, last_error = NULL, dispatched = 0, version = version + 1 WHERE id = ?1",
                [id.0 as i64],
            )
            .context("reset verdict")?;
            tx.execute(
                "UPDATE inodes SET checked = 0 WHERE id = (SELECT inode_id FROM files WHERE id = ?1)",
                [id.0 as i64],
            )
            .context("reset inode")?;
            tx.commit().context("commit reset")?;
        }
        self.file(id)?
            .ok_or_else(|| anyhow!("file {id} not found"))
    }

    fn update_display_names(&self, title_id: TitleId, names: &DisplayNames) -> Result<()> {
        let names_json = serde_json::to_string(names).context("encode display names")?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE titles SET display_names = ?2 WHERE id = ?1",
                params![title_id.0 as i64, names_json],
            )
            .context("update display names")?;
        if changed == 0 {
            return Err(anyhow!("title {title_id} not found"));
        }
        Ok(())
    }

    fn set_dispatched(&self, id: FileId, dispatched: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE files SET dispatched = ?2 WHERE id = ?1",
                params![id.0 as i64, dispatched],
            )
            .context("update dispatch flag")?;
        if changed == 0 {
            return Err(anyhow!("file {id} not found"));
        }
        Ok(())
    }

    fn unchecked_files(&self) -> Result<Vec<FileRecord>> {
        self.files_where("checked = 0", [])
    }

    fn undispatched_files(&self) -> Result<Vec<FileRecord>> {
        self.files_where("checked = 1 AND consistent = 1 AND dispatched = 0", [])
    }

    fn titles_with_inconsistent_files(&self) -> Result<Vec<TitleRecord>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT t.id, t.catalog_number, t.display_names FROM titles t \
                 WHERE EXISTS (SELECT 1 FROM files f WHERE f.title_id = t.id AND f.checked = 1 AND f.consistent = 0) \
                 ORDER BY t.catalog_number",
            )?;
            let rows = stmt.query_map([], row_to_title)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("query titles with inconsistent files")?
        };
        rows.into_iter().map(decode_title).collect()
    }

    fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("ping database")
    }
}

impl DownstreamSink for SqliteRepository {
    /// Record the task in `pending_tasks` for the external thumbnail/hash workers. A task already
    /// recorded for the file is not recorded twice.
    fn accept(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task).context("encode task")?;
        let kind = match task {
            Task::VerifyFile { .. } => "verify_file",
            Task::GenerateThumbnail { .. } => "generate_thumbnail",
            Task::ComputeHash { .. } => "compute_hash",
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO pending_tasks (file_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task.file_id().0 as i64, kind, payload, unix_now()],
        )
        .context("record pending task")?;
        Ok(())
    }
}
