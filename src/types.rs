//! Records, identities, and task messages shared by the extractor, repository, and pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Catalog identity derived from a filename.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Canonical catalog number, e.g. `ABC-123`.
    pub catalog_number: String,
    /// 1-based part index for multi-file titles.
    pub part_index: u32,
}

impl Identity {
    pub fn new(catalog_number: impl Into<String>, part_index: u32) -> Self {
        Self {
            catalog_number: catalog_number.into(),
            part_index: part_index.max(1),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.part_index > 1 {
            write!(f, "{} (part {})", self.catalog_number, self.part_index)
        } else {
            f.write_str(&self.catalog_number)
        }
    }
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Row id of a [`FileRecord`].
    FileId
);
record_id!(
    /// Row id of a [`TitleRecord`].
    TitleId
);
record_id!(
    /// Filesystem inode number; the deduplication key for hard links.
    InodeId
);

/// One observed video file.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub id: FileId,
    pub title_id: TitleId,
    pub filename: String,
    pub path: PathBuf,
    pub part_index: u32,
    pub inode_id: InodeId,
    pub checked: bool,
    pub consistent: bool,
    /// Container length in milliseconds, when known.
    pub length_ms: Option<u64>,
    /// Reason of the last failed verification attempt. Cleared by a committed verdict.
    pub last_error: Option<String>,
    /// Bumped on every verdict, failure, or reset write.
    pub version: u64,
    /// Fan-out of a consistent verdict was published and not reported lost since.
    pub dispatched: bool,
}

impl FileRecord {
    pub fn status(&self) -> CheckStatus {
        match (self.checked, self.consistent, &self.last_error) {
            (true, true, _) => CheckStatus::Consistent,
            (true, false, _) => CheckStatus::Inconsistent,
            (false, _, Some(_)) => CheckStatus::Failed,
            (false, _, None) => CheckStatus::Unchecked,
        }
    }
}

/// Fields needed to create a [`FileRecord`]; the repository assigns the id.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub title_id: TitleId,
    pub filename: String,
    pub path: PathBuf,
    pub part_index: u32,
    pub inode_id: InodeId,
}

/// Persisted verification state of a file. `Checking` only exists in a worker's stack frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Unchecked,
    Consistent,
    Inconsistent,
    /// Last probe attempt failed; retryable.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InodeRecord {
    pub id: InodeId,
    pub filesize: u64,
    pub checked: bool,
}

/// Human-facing names of a title, edited outside the ingest pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNames {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub japanese: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TitleRecord {
    pub id: TitleId,
    pub catalog_number: String,
    pub display_names: DisplayNames,
}

/// Outcome of one verification cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub checked: bool,
    pub consistent: bool,
    /// Length reported by the probe when the record had none.
    pub length_ms: Option<u64>,
}

impl Verdict {
    pub fn consistent(length_ms: Option<u64>) -> Self {
        Self {
            checked: true,
            consistent: true,
            length_ms,
        }
    }

    pub fn inconsistent(length_ms: Option<u64>) -> Self {
        Self {
            checked: true,
            consistent: false,
            length_ms,
        }
    }
}

/// Hash algorithms requested from the downstream hash workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Fast non-cryptographic digest (xxhash family).
    Fast,
    /// Cryptographic digest.
    Cryptographic,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Fast => "fast",
            HashAlgorithm::Cryptographic => "cryptographic",
        }
    }
}

/// Queue message. Carries ids only; workers load records themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    VerifyFile {
        file_id: FileId,
    },
    GenerateThumbnail {
        file_id: FileId,
    },
    ComputeHash {
        file_id: FileId,
        algorithm: HashAlgorithm,
    },
}

impl Task {
    pub fn file_id(&self) -> FileId {
        match *self {
            Task::VerifyFile { file_id }
            | Task::GenerateThumbnail { file_id }
            | Task::ComputeHash { file_id, .. } => file_id,
        }
    }

    pub fn is_downstream(&self) -> bool {
        !matches!(self, Task::VerifyFile { .. })
    }

    /// The fan-out published after a consistent verdict: one thumbnail, two hashes.
    pub fn fan_out(file_id: FileId) -> [Task; 3] {
        [
            Task::GenerateThumbnail { file_id },
            Task::ComputeHash {
                file_id,
                algorithm: HashAlgorithm::Fast,
            },
            Task::ComputeHash {
                file_id,
                algorithm: HashAlgorithm::Cryptographic,
            },
        ]
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::VerifyFile { file_id } => write!(f, "verify-file({file_id})"),
            Task::GenerateThumbnail { file_id } => write!(f, "generate-thumbnail({file_id})"),
            Task::ComputeHash { file_id, algorithm } => {
                write!(f, "compute-hash({file_id}, {})", algorithm.as_str())
            }
        }
    }
}

/// Options for a scan or verify run (CLI and lib).
#[derive(Clone, Debug)]
pub struct Opts {
    /// Database path. When None, uses `root.join(<package db filename>)`.
    pub db_path: Option<PathBuf>,
    /// Number of verification workers.
    pub num_workers: usize,
    /// Strict probe mode: corruption warnings fail the verdict even on a clean exit.
    pub strict: bool,
    /// Follow symbolic links while scanning.
    pub follow_links: bool,
    /// Exclude patterns (glob syntax).
    pub exclude: Vec<String>,
    /// Show progress counter and debug logs.
    pub verbose: bool,
    /// Register files and queue verification without running workers.
    pub register_only: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            db_path: None,
            num_workers: crate::utils::config::WorkerLimits::DEFAULT_WORKERS,
            strict: true,
            follow_links: false,
            exclude: Vec::new(),
            verbose: false,
            register_only: false,
        }
    }
}

/// Everything a run needs: options plus extractor, probe, and scan configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    pub opts: Opts,
    pub extractor: crate::identity::ExtractorConfig,
    pub probe: crate::probe::ProbeConfig,
    /// Video file extensions considered by the scan, without the dot.
    pub extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            opts: Opts::default(),
            extractor: Default::default(),
            probe: Default::default(),
            extensions: crate::utils::config::default_video_extensions(),
        }
    }
}
