//! Verification step of the pipeline: one `verify-file` task → at most one committed verdict.
//!
//! Idempotent per file: an already checked file is skipped, a file whose inode was verified
//! through a hard-link sibling adopts that verdict, and the commit is compare-and-swap so a
//! racing worker that loses never dispatches follow-up work.

use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::error::OrchestratorError;
use crate::probe::{CheckHooks, ConsistencyChecker, OutputKind, Progress};
use crate::repository::{CommitOutcome, Repository};
use crate::types::{FileId, FileRecord, Task, TitleId, Verdict};

use super::queue::TaskQueue;

/// Observer for raw probe output, e.g. a presentation layer streaming it to an operator.
pub type OutputObserver = Arc<dyn Fn(FileId, OutputKind, &str) + Send + Sync>;

/// What `verify` did with a task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// File already carried a verdict; nothing ran.
    Skipped,
    /// Verdict copied from a checked file on the same inode; no probe ran.
    Adopted { record: FileRecord, dispatched: usize },
    /// Probe ran and its verdict was committed.
    Committed { record: FileRecord, dispatched: usize },
}

impl TaskOutcome {
    /// Number of downstream tasks published.
    pub fn dispatched(&self) -> usize {
        match self {
            TaskOutcome::Skipped => 0,
            TaskOutcome::Adopted { dispatched, .. } | TaskOutcome::Committed { dispatched, .. } => {
                *dispatched
            }
        }
    }
}

pub struct PipelineOrchestrator {
    repo: Arc<dyn Repository>,
    checker: Arc<ConsistencyChecker>,
    queue: Arc<dyn TaskQueue>,
    strict: bool,
    observer: Option<OutputObserver>,
}

impl PipelineOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        checker: Arc<ConsistencyChecker>,
        queue: Arc<dyn TaskQueue>,
        strict: bool,
    ) -> Self {
        Self {
            repo,
            checker,
            queue,
            strict,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle one queue task. Downstream tasks are not ours and are skipped.
    pub fn handle(&self, task: &Task) -> Result<TaskOutcome, OrchestratorError> {
        match *task {
            Task::VerifyFile { file_id } => self.verify(file_id),
            _ => {
                warn!("orchestrator ignoring downstream task {}", task);
                Ok(TaskOutcome::Skipped)
            }
        }
    }

    /// Verify one file and, when it is consistent, publish its fan-out.
    pub fn verify(&self, file_id: FileId) -> Result<TaskOutcome, OrchestratorError> {
        let file = self
            .repo
            .file(file_id)?
            .ok_or(OrchestratorError::MissingFile(file_id))?;
        if file.checked {
            debug!("{} already checked, skipping", file.path.display());
            return Ok(TaskOutcome::Skipped);
        }

        if let Some(sibling) = self.checked_sibling(&file)? {
            debug!(
                "{} shares inode {} with checked file {}",
                file.path.display(),
                file.inode_id,
                sibling.id
            );
            let verdict = Verdict {
                checked: true,
                consistent: sibling.consistent,
                length_ms: file.length_ms.or(sibling.length_ms),
            };
            let (record, dispatched) = self.commit(&file, &verdict)?;
            return Ok(TaskOutcome::Adopted { record, dispatched });
        }

        info!("Checking health of {}", file.path.display());
        let mut hooks = OrchestratorHooks {
            repo: self.repo.as_ref(),
            file_id,
            observer: self.observer.as_ref(),
        };
        match self.checker.check_health(&file, self.strict, &mut hooks) {
            Ok(verdict) => {
                let (record, dispatched) = self.commit(&file, &verdict)?;
                Ok(TaskOutcome::Committed { record, dispatched })
            }
            Err(source) => {
                error!("Verification of {} failed: {}", file.path.display(), source);
                match self.repo.mark_failed(file_id, &source.to_string()) {
                    Ok(CommitOutcome::Committed(_)) => {}
                    Ok(CommitOutcome::Conflict(c)) => debug!("failure not recorded: {}", c),
                    Err(e) => warn!("could not record failure of file {}: {:#}", file_id, e),
                }
                Err(OrchestratorError::Probe { file_id, source })
            }
        }
    }

    /// Queue verification for every file of a title. Without `force`, files whose inode is already
    /// checked are left alone; with it, their verdicts are cleared first. Returns the queued count.
    pub fn verify_title(&self, title_id: TitleId, force: bool) -> Result<usize, OrchestratorError> {
        let files = self.repo.files_for_title(title_id)?;
        let mut tasks = Vec::with_capacity(files.len());
        for file in files {
            if force {
                self.repo.reset_verdict(file.id)?;
            } else {
                let inode_checked = self.repo.inode(file.inode_id)?.is_some_and(|i| i.checked);
                if inode_checked {
                    continue;
                }
            }
            tasks.push(Task::VerifyFile { file_id: file.id });
        }
        self.queue.publish_all(&tasks)?;
        debug!("queued {} file(s) of title {}", tasks.len(), title_id);
        Ok(tasks.len())
    }

    /// Queue verification for every file still lacking a verdict, failed ones included.
    pub fn enqueue_unchecked(&self) -> Result<usize, OrchestratorError> {
        let tasks: Vec<Task> = self
            .repo
            .unchecked_files()?
            .into_iter()
            .map(|f| Task::VerifyFile { file_id: f.id })
            .collect();
        self.queue.publish_all(&tasks)?;
        Ok(tasks.len())
    }

    /// Publish the fan-out again for consistent files whose tasks never went out or were lost.
    /// Returns the number of files redispatched.
    pub fn redispatch_undelivered(&self) -> Result<usize, OrchestratorError> {
        let files = self.repo.undispatched_files()?;
        for file in &files {
            self.dispatch(file.id)?;
        }
        if !files.is_empty() {
            info!("redispatched follow-up tasks of {} file(s)", files.len());
        }
        Ok(files.len())
    }

    /// A downstream task of `file_id` could not be delivered; its fan-out is redone next run.
    pub fn fan_out_lost(&self, file_id: FileId) -> Result<(), OrchestratorError> {
        self.repo.set_dispatched(file_id, false)?;
        Ok(())
    }

    fn checked_sibling(&self, file: &FileRecord) -> Result<Option<FileRecord>, OrchestratorError> {
        let inode_checked = self.repo.inode(file.inode_id)?.is_some_and(|i| i.checked);
        if !inode_checked {
            return Ok(None);
        }
        Ok(self.repo.checked_sibling(file.inode_id, file.id)?)
    }

    /// Compare-and-swap the verdict, then publish the fan-out for a consistent file.
    fn commit(
        &self,
        file: &FileRecord,
        verdict: &Verdict,
    ) -> Result<(FileRecord, usize), OrchestratorError> {
        let mut record = match self.repo.commit_verdict(file.id, verdict)? {
            CommitOutcome::Committed(record) => record,
            CommitOutcome::Conflict(conflict) => return Err(conflict.into()),
        };
        if !record.consistent {
            warn!("{} is inconsistent", record.path.display());
            return Ok((record, 0));
        }
        let dispatched = self.dispatch(record.id)?;
        record.dispatched = true;
        info!(
            "{} is consistent; dispatched {} task(s)",
            record.path.display(),
            dispatched
        );
        Ok((record, dispatched))
    }

    /// Flag a committed consistent file dispatched, then publish its fan-out. The flag goes first
    /// so a delivery lost right after publishing cannot be overwritten; a refused publish clears
    /// it again and leaves the file to [`redispatch_undelivered`](Self::redispatch_undelivered).
    fn dispatch(&self, file_id: FileId) -> Result<usize, OrchestratorError> {
        self.repo.set_dispatched(file_id, true)?;
        let tasks = Task::fan_out(file_id);
        if let Err(e) = self.queue.publish_all(&tasks) {
            error!("could not dispatch follow-up tasks of file {}: {:#}", file_id, e);
            if let Err(reset) = self.repo.set_dispatched(file_id, false) {
                warn!("file {} left flagged dispatched: {:#}", file_id, reset);
            }
            return Err(e.into());
        }
        Ok(tasks.len())
    }
}

struct OrchestratorHooks<'a> {
    repo: &'a dyn Repository,
    file_id: FileId,
    observer: Option<&'a OutputObserver>,
}

impl CheckHooks for OrchestratorHooks<'_> {
    fn on_output(&mut self, kind: OutputKind, text: &str) {
        if let Some(observer) = self.observer {
            observer(self.file_id, kind, text);
        }
    }

    fn on_progress(&mut self, progress: &Progress) {
        match progress.percent {
            Some(pct) => debug!("file {}: {:.2}%", self.file_id, pct),
            None => debug!("file {}: {} ms decoded", self.file_id, progress.elapsed_ms),
        }
    }

    fn keepalive(&mut self) -> anyhow::Result<()> {
        self.repo.ping()
    }
}
