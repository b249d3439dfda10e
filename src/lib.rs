//! Vidingest: catalog video files by filename identity, verify them with a media probe, and fan
//! out thumbnail and hash work for healthy files.

pub mod cleanup;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod pipeline;
pub mod probe;
pub mod repository;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use cleanup::{CleanupReport, cleanup};
pub use error::{ExtractionFailure, OrchestratorError, PersistenceConflict, ProbeError};
pub use identity::{Extraction, IdentityExtractor, UnqualifiedReason};
pub use ingest::{RunReport, scan_dir, verify_pending};

/// Result alias used by the public vidingest API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
