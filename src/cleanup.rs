//! Cleanup: report titles owning inconsistent files and re-verify every file they own.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::Settings;
use crate::engine::SqliteRepository;
use crate::ingest::{build_worker, finish_run};
use crate::pipeline::{ChannelQueue, RunControl, Worker, WorkerStats, spawn_workers};
use crate::repository::Repository;
use crate::types::{FileRecord, TitleRecord};
use crate::utils::Colors;

/// One file of a broken title, with the size of its inode.
#[derive(Clone, Debug)]
pub struct BrokenFile {
    pub record: FileRecord,
    pub filesize: u64,
}

/// A title with at least one inconsistent file.
#[derive(Clone, Debug)]
pub struct BrokenTitle {
    pub title: TitleRecord,
    pub files: Vec<BrokenFile>,
}

impl BrokenTitle {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.filesize).sum()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CleanupReport {
    /// Titles found broken before re-verification.
    pub broken: Vec<BrokenTitle>,
    /// Summed inode size of every listed file.
    pub total_size: u64,
    pub queued: usize,
    pub workers: WorkerStats,
    /// Titles whose files could not be queued; the others were still processed.
    pub failed_titles: usize,
    /// Titles still owning an inconsistent file afterwards.
    pub still_broken: usize,
}

/// Titles owning inconsistent files, each with all of its files.
pub fn find_broken_titles(repo: &dyn Repository) -> Result<Vec<BrokenTitle>> {
    repo.titles_with_inconsistent_files()?
        .into_iter()
        .map(|title| {
            let files = repo
                .files_for_title(title.id)?
                .into_iter()
                .map(|record| {
                    let filesize = repo.inode(record.inode_id)?.map_or(0, |i| i.filesize);
                    Ok(BrokenFile { record, filesize })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(BrokenTitle { title, files })
        })
        .collect()
}

fn print_broken(broken: &[BrokenTitle], total_size: u64) {
    if broken.is_empty() {
        info!("No titles with inconsistent files.");
        return;
    }
    info!(
        "{:<16} {:>12} {:>4} {:>14}  {}",
        "CATALOG", "INODE", "PART", "SIZE", "FILE"
    );
    for entry in broken {
        for file in &entry.files {
            info!(
                "{:<16} {:>12} {:>4} {:>14}  {} [{}]",
                entry.title.catalog_number,
                file.record.inode_id.0,
                file.record.part_index,
                file.filesize,
                file.record.filename,
                Colors::status(file.record.status())
            );
        }
    }
    info!(
        "{} | Size {} bytes",
        Colors::count("Broken titles", broken.len(), true),
        total_size
    );
}

/// Report broken titles; unless `dry_run`, clear the verdict of every file they own and verify
/// each one again in strict mode.
pub fn cleanup(db_path: &Path, settings: &Settings, dry_run: bool, control: &RunControl) -> Result<CleanupReport> {
    let mut strict = settings.clone();
    strict.opts.strict = true;
    cleanup_with(db_path, &strict, dry_run, control, |queue| {
        build_worker(db_path, &strict, queue)
    })
}

/// [`cleanup`] with a caller-supplied worker factory, called once for the coordinating worker and
/// once per worker thread.
pub fn cleanup_with<F>(
    db_path: &Path,
    settings: &Settings,
    dry_run: bool,
    control: &RunControl,
    make: F,
) -> Result<CleanupReport>
where
    F: Fn(&Arc<ChannelQueue>) -> Result<Worker>,
{
    let repo = SqliteRepository::open(db_path)?;
    let broken = find_broken_titles(&repo)?;
    let total_size = broken.iter().map(BrokenTitle::total_size).sum();
    print_broken(&broken, total_size);
    let mut report = CleanupReport {
        broken,
        total_size,
        ..Default::default()
    };
    if dry_run || report.broken.is_empty() {
        return Ok(report);
    }

    let queue = Arc::new(ChannelQueue::new());
    let main = make(&queue)?;
    if let Err(e) = main.orchestrator.redispatch_undelivered() {
        error!("could not redispatch follow-up tasks: {}", e);
    }
    for entry in &report.broken {
        match main.orchestrator.verify_title(entry.title.id, true) {
            Ok(n) => report.queued += n,
            Err(e) => {
                error!("Could not queue {}: {}", entry.title.catalog_number, e);
                report.failed_titles += 1;
            }
        }
    }
    debug!("{} file(s) queued for re-verification", report.queued);

    control.close_input();
    let handles = spawn_workers(&queue, settings.opts.num_workers, control, |_| make(&queue))?;
    let (workers, abandoned) = finish_run(&queue, handles, &main);
    report.workers = workers;
    if abandoned > 0 {
        warn!("Cancelled; {} file(s) left unchecked", abandoned);
    }

    report.still_broken = repo.titles_with_inconsistent_files()?.len();
    info!(
        "{} | {}",
        Colors::count("Re-verified", report.workers.verified + report.workers.adopted, false),
        Colors::count("Still broken", report.still_broken, true)
    );
    Ok(report)
}
