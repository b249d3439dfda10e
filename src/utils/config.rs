//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
    config_env_key: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!(".{pkg}.db"),
                config_filename: format!("{pkg}.toml"),
                config_env_key: format!("{}_CONFIG", pkg.to_uppercase()),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn output_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Environment variable naming an explicit config file.
    pub fn config_env_key(&self) -> &str {
        &self.config_env_key
    }

    /// Filenames excluded from the scan by default. The database itself is excluded via its
    /// canonical path.
    pub fn default_exclude_patterns(&self) -> Vec<String> {
        vec![
            format!("{}-wal", self.db_filename),
            format!("{}-shm", self.db_filename),
            self.config_filename.clone(),
        ]
    }
}

// ---- Workers ----

pub struct WorkerLimits;

impl WorkerLimits {
    /// Verification workers when not configured. Each one owns a probe process while busy.
    pub const DEFAULT_WORKERS: usize = 2;
    pub const MAX_WORKERS: usize = 32;

    /// How long an idle worker waits on the queue before re-checking for shutdown.
    pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Deliveries of one downstream task before it is reported lost.
    pub const DOWNSTREAM_ATTEMPTS: u32 = 3;
    /// Pause before redelivering a failed downstream task, multiplied by the attempt number.
    pub const DOWNSTREAM_BACKOFF: Duration = Duration::from_millis(100);

    pub fn clamp(requested: usize) -> usize {
        requested.clamp(1, Self::MAX_WORKERS)
    }
}

// ---- Probe ----

pub struct ProbeConsts;

impl ProbeConsts {
    pub const PROGRAM: &'static str = "ffmpeg";
    /// Wall-clock spacing of keepalive pings while a probe runs.
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
    /// Upper bound on one probe run; the child is killed past it.
    pub const TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
    /// Output chunk channel capacity between the pipe readers and the checker.
    pub const OUTPUT_CHANNEL_CAP: usize = 1024;
    /// Pipe read buffer size (bytes).
    pub const READ_CHUNK_SIZE: usize = 8 * 1024;

    /// Lowercase output fragments that mark a damaged or unreadable stream.
    pub fn default_corruption_signals() -> Vec<String> {
        [
            "invalid data found when processing input",
            "moov atom not found",
            "could not find codec parameters",
            "error while decoding",
            "corrupt",
            "invalid nal unit",
            "non-existing pps",
            "decode_slice_header error",
            "concealing",
            "missing picture",
            "header missing",
            "truncated",
            "partial file",
            "end of file",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

// ---- Scan ----

/// Extensions treated as video files by the scan.
pub fn default_video_extensions() -> Vec<String> {
    [
        "mkv", "mp4", "m4v", "avi", "wmv", "mov", "mpg", "mpeg", "ts", "m2ts", "webm", "flv",
        "rmvb", "iso",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Progress counter refresh batch while scanning.
pub const PROGRESS_UPDATE_BATCH_SIZE: usize = 25;

/// Path channel capacity between the walk thread and the registrar.
pub const WALK_CHANNEL_CAP: usize = 10_000;

// ---- Database ----

pub struct DbConsts;

impl DbConsts {
    /// How long a connection waits on a locked database before failing.
    pub const BUSY_TIMEOUT_MS: u64 = 10_000;
}
