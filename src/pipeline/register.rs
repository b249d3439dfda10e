//! Registrar: turns walked paths into stored files and queued verification tasks.

use anyhow::Result;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::resolver::{DuplicateResolver, Registration};
use crate::engine::tools::file_identity;
use crate::identity::{Extraction, IdentityExtractor};
use crate::types::Task;

use super::queue::TaskQueue;

/// Counters for one scan.
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    /// Video paths received from the walk.
    pub seen: usize,
    pub registered: usize,
    pub known: usize,
    pub new_titles: usize,
    /// Skipped by the blacklist or as download artifacts.
    pub unqualified: usize,
    /// No matcher found a catalog number.
    pub unmatched: usize,
    /// Verification tasks published.
    pub queued: usize,
    /// Paths that could not be registered, with the reason.
    pub errors: Vec<(PathBuf, String)>,
    /// Walk entries that could not be read.
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct Registrar<'a> {
    extractor: &'a IdentityExtractor,
    resolver: &'a DuplicateResolver,
    queue: &'a dyn TaskQueue,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Registrar<'a> {
    pub fn new(
        extractor: &'a IdentityExtractor,
        resolver: &'a DuplicateResolver,
        queue: &'a dyn TaskQueue,
    ) -> Self {
        Self {
            extractor,
            resolver,
            queue,
            cancel: None,
        }
    }

    /// Stop taking paths once `flag` is set.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Register every path from `path_rx` until the walk closes it. Per-path failures are
    /// recorded in the report and do not stop the scan.
    pub fn run(&self, path_rx: Receiver<PathBuf>, on_progress: Option<&dyn Fn(usize)>) -> ScanReport {
        let mut report = ScanReport::default();
        while let Ok(path) = path_rx.recv() {
            if self.cancel.is_some_and(|c| c.load(Ordering::Acquire)) {
                warn!("Scan cancelled after {} path(s)", report.seen);
                break;
            }
            report.seen += 1;
            if let Err(e) = self.register_path(&path, &mut report) {
                error!("Could not register {}: {:#}", path.display(), e);
                report.errors.push((path, format!("{e:#}")));
            }
            if let Some(cb) = on_progress {
                cb(1);
            }
        }
        debug!(
            "registrar done: {} seen, {} new, {} known, {} queued",
            report.seen, report.registered, report.known, report.queued
        );
        report
    }

    /// Extract, resolve, store, and queue verification for one path.
    pub fn register_path(&self, path: &Path, report: &mut ScanReport) -> Result<()> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identity = match self.extractor.extract(&filename) {
            Extraction::Qualified(identity) => identity,
            Extraction::Unqualified(reason) => {
                warn!("Skipping {}: {}", path.display(), reason);
                report.unqualified += 1;
                return Ok(());
            }
            Extraction::Failed(failure) => {
                info!("{}", failure);
                report.unmatched += 1;
                return Ok(());
            }
        };

        let (inode_id, size) = file_identity(path)?;
        let registration = self.resolver.register(path, inode_id, size, &identity)?;
        match &registration {
            Registration::Known(_) => report.known += 1,
            Registration::New { new_title, .. } => {
                report.registered += 1;
                if *new_title {
                    report.new_titles += 1;
                }
            }
        }

        let file = registration.file();
        if !file.checked {
            self.queue.publish(Task::VerifyFile { file_id: file.id })?;
            report.queued += 1;
        }
        Ok(())
    }
}
