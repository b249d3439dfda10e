//! Error taxonomy for extraction, probing, and verdict persistence.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::FileId;

/// No matcher produced a catalog number.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no catalog number in {filename:?} (tried: {})", .attempted.join(", "))]
pub struct ExtractionFailure {
    pub filename: String,
    /// Matcher names in the order they were tried.
    pub attempted: Vec<&'static str>,
}

/// The media probe could not produce a verdict.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to start probe `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe terminated without exit code on {}", .path.display())]
    Crashed { path: PathBuf },

    #[error("probe exited with status {code} on {}: {tail}", .path.display())]
    AbnormalExit {
        path: PathBuf,
        code: i32,
        /// Last output line, for the operator.
        tail: String,
    },

    #[error("probe exceeded {limit:?} on {}", .path.display())]
    TimedOut { path: PathBuf, limit: Duration },
}

/// Another worker committed a verdict for this file first.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("verdict for file {file_id} already committed by another worker")]
pub struct PersistenceConflict {
    pub file_id: FileId,
}

/// Failures surfaced by [`PipelineOrchestrator`](crate::pipeline::PipelineOrchestrator).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("file {0} not found")]
    MissingFile(FileId),

    #[error("verification of file {file_id} failed: {source}")]
    Probe {
        file_id: FileId,
        #[source]
        source: ProbeError,
    },

    #[error(transparent)]
    Conflict(#[from] PersistenceConflict),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}
