//! Database operations: schema, connection setup, and the SQLite-backed repository.

mod connection;
mod sqlite_repo;

pub use connection::{open_db, open_db_in_memory};
pub use sqlite_repo::SqliteRepository;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        PRAGMA foreign_keys = ON;
        "#;

/// Columns selected for a file row, in `row_to_file` order.
pub(crate) const FILE_COLUMNS: &str = "id, title_id, filename, path, part_index, inode_id, checked, consistent, length_ms, last_error, version, dispatched";

/// Schema for inodes, titles, files, and the downstream task outbox.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inodes (
    id INTEGER PRIMARY KEY,
    filesize INTEGER NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS titles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    catalog_number TEXT NOT NULL UNIQUE,
    display_names TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title_id INTEGER NOT NULL REFERENCES titles(id),
    filename TEXT NOT NULL,
    path TEXT NOT NULL,
    part_index INTEGER NOT NULL DEFAULT 1,
    inode_id INTEGER NOT NULL REFERENCES inodes(id),
    checked INTEGER NOT NULL DEFAULT 0,
    consistent INTEGER NOT NULL DEFAULT 0,
    length_ms INTEGER,
    last_error TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    dispatched INTEGER NOT NULL DEFAULT 0,
    UNIQUE (inode_id, path)
);
CREATE INDEX IF NOT EXISTS idx_files_title ON files(title_id);

CREATE TABLE IF NOT EXISTS pending_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id),
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (file_id, payload)
);
"#;
