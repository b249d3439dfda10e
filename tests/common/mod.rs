//! Shared fixtures: scripted probe, recording queue, seeded records.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use vidingest::ProbeError;
use vidingest::pipeline::{DownstreamSink, PipelineOrchestrator, TaskQueue};
use vidingest::probe::{
    ConsistencyChecker, ExitInfo, ManualClock, OutputChunk, OutputKind, ProbeConfig, ProbeEvent,
    ProbeRecv, ProbeRunner, ProbeSession,
};
use vidingest::repository::{CommitOutcome, MemoryRepository, Repository};
use vidingest::{
    DisplayNames, FileId, FileRecord, InodeId, InodeRecord, NewFile, Task, TitleId, TitleRecord,
    Verdict,
};

#[derive(Clone, Debug)]
pub enum Step {
    /// One stderr line.
    Out(&'static str),
    /// Silence; advances the manual clock while the checker waits.
    Idle(Duration),
    Exit(Option<i32>),
}

pub fn healthy() -> Vec<Step> {
    vec![
        Step::Out("Duration: 00:10:00.00, start: 0.000000, bitrate: 2000 kb/s"),
        Step::Out("frame= 9000 fps=900 q=-0.0 size=N/A time=00:05:00.00 bitrate=N/A speed=30x"),
        Step::Out("frame=18000 fps=900 q=-0.0 size=N/A time=00:10:00.00 bitrate=N/A speed=30x"),
        Step::Exit(Some(0)),
    ]
}

pub fn corrupt() -> Vec<Step> {
    vec![
        Step::Out("[h264 @ 0x55d0] error while decoding MB 12 34, bytestream -5"),
        Step::Out("Error while decoding stream #0:0: Invalid data found when processing input"),
        Step::Exit(Some(69)),
    ]
}

pub struct ScriptedRunner {
    script: Vec<Step>,
    clock: Option<Arc<ManualClock>>,
    barrier: Option<Arc<Barrier>>,
    fail_spawn: bool,
    runs: AtomicUsize,
    killed: Arc<AtomicBool>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            clock: None,
            barrier: None,
            fail_spawn: false,
            runs: AtomicUsize::new(0),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Every `run` waits on `barrier` first, so racing workers start probing together.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl ProbeRunner for ScriptedRunner {
    fn run(&self, _path: &Path, _strict: bool) -> Result<Box<dyn ProbeSession>, ProbeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_spawn {
            return Err(ProbeError::Spawn {
                program: "fake-probe".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
            });
        }
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
        Ok(Box::new(ScriptedSession {
            steps: self.script.iter().cloned().collect(),
            clock: self.clock.clone(),
            killed: Arc::clone(&self.killed),
        }))
    }
}

struct ScriptedSession {
    steps: VecDeque<Step>,
    clock: Option<Arc<ManualClock>>,
    killed: Arc<AtomicBool>,
}

impl ProbeSession for ScriptedSession {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<ProbeRecv, ProbeError> {
        match self.steps.front_mut() {
            None => Ok(ProbeRecv::Closed),
            Some(Step::Idle(left)) => {
                let waited = (*left).min(timeout);
                if let Some(clock) = &self.clock {
                    clock.advance(waited);
                }
                *left -= waited;
                if left.is_zero() {
                    self.steps.pop_front();
                }
                Ok(ProbeRecv::Idle)
            }
            Some(Step::Out(text)) => {
                let text = text.to_string();
                self.steps.pop_front();
                Ok(ProbeRecv::Event(ProbeEvent::Output(OutputChunk {
                    kind: OutputKind::Stderr,
                    text,
                })))
            }
            Some(Step::Exit(code)) => {
                let code = *code;
                self.steps.clear();
                Ok(ProbeRecv::Event(ProbeEvent::Exited(ExitInfo { code })))
            }
        }
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        self.steps.clear();
    }
}

/// Queue that records publishes and whether the file's verdict was stored at that moment.
pub struct RecordingQueue {
    repo: Arc<MemoryRepository>,
    published: Mutex<Vec<Task>>,
    calls: AtomicUsize,
    durable_at_publish: Mutex<Vec<bool>>,
    refuse: AtomicBool,
}

impl RecordingQueue {
    pub fn new(repo: Arc<MemoryRepository>) -> Self {
        Self {
            repo,
            published: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            durable_at_publish: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        }
    }

    /// While set, every publish fails and records nothing.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Task> {
        self.published.lock().unwrap().clone()
    }

    pub fn publish_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn durable_at_publish(&self) -> Vec<bool> {
        self.durable_at_publish.lock().unwrap().clone()
    }
}

impl TaskQueue for RecordingQueue {
    fn publish_all(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            anyhow::bail!("queue unavailable");
        }
        for task in tasks {
            let durable = self
                .repo
                .file(task.file_id())?
                .is_some_and(|f| f.checked);
            self.durable_at_publish.lock().unwrap().push(durable);
        }
        self.published.lock().unwrap().extend_from_slice(tasks);
        Ok(())
    }
}

/// Memory repository whose verdict commits can be made to fail like a lost connection.
pub struct FlakyRepository {
    pub inner: Arc<MemoryRepository>,
    fail_commits: AtomicBool,
}

impl FlakyRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl Repository for FlakyRepository {
    fn file(&self, id: FileId) -> anyhow::Result<Option<FileRecord>> {
        self.inner.file(id)
    }

    fn inode(&self, id: InodeId) -> anyhow::Result<Option<InodeRecord>> {
        self.inner.inode(id)
    }

    fn title(&self, id: TitleId) -> anyhow::Result<Option<TitleRecord>> {
        self.inner.title(id)
    }

    fn title_by_catalog(&self, catalog_number: &str) -> anyhow::Result<Option<TitleRecord>> {
        self.inner.title_by_catalog(catalog_number)
    }

    fn file_by_inode_and_path(&self, inode_id: InodeId, path: &Path) -> anyhow::Result<Option<FileRecord>> {
        self.inner.file_by_inode_and_path(inode_id, path)
    }

    fn files_for_title(&self, title_id: TitleId) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.files_for_title(title_id)
    }

    fn checked_sibling(&self, inode_id: InodeId, exclude: FileId) -> anyhow::Result<Option<FileRecord>> {
        self.inner.checked_sibling(inode_id, exclude)
    }

    fn insert_inode(&self, inode: &InodeRecord) -> anyhow::Result<()> {
        self.inner.insert_inode(inode)
    }

    fn insert_title(&self, catalog_number: &str, names: &DisplayNames) -> anyhow::Result<TitleRecord> {
        self.inner.insert_title(catalog_number, names)
    }

    fn insert_file(&self, file: &NewFile) -> anyhow::Result<FileRecord> {
        self.inner.insert_file(file)
    }

    fn commit_verdict(&self, id: FileId, verdict: &Verdict) -> anyhow::Result<CommitOutcome> {
        if self.fail_commits.load(Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        self.inner.commit_verdict(id, verdict)
    }

    fn mark_failed(&self, id: FileId, reason: &str) -> anyhow::Result<CommitOutcome> {
        self.inner.mark_failed(id, reason)
    }

    fn reset_verdict(&self, id: FileId) -> anyhow::Result<FileRecord> {
        self.inner.reset_verdict(id)
    }

    fn update_display_names(&self, title_id: TitleId, names: &DisplayNames) -> anyhow::Result<()> {
        self.inner.update_display_names(title_id, names)
    }

    fn set_dispatched(&self, id: FileId, dispatched: bool) -> anyhow::Result<()> {
        self.inner.set_dispatched(id, dispatched)
    }

    fn unchecked_files(&self) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.unchecked_files()
    }

    fn undispatched_files(&self) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.undispatched_files()
    }

    fn titles_with_inconsistent_files(&self) -> anyhow::Result<Vec<TitleRecord>> {
        self.inner.titles_with_inconsistent_files()
    }

    fn ping(&self) -> anyhow::Result<()> {
        self.inner.ping()
    }
}

/// Sink that refuses its first `failures` tasks, then collects.
pub struct FlakySink {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<Task>>,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Never accepts anything.
    pub fn broken() -> Self {
        Self::new(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<Task> {
        self.accepted.lock().unwrap().clone()
    }
}

impl DownstreamSink for FlakySink {
    fn accept(&self, task: &Task) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            anyhow::bail!("outbox insert failed: database is locked");
        }
        self.accepted.lock().unwrap().push(*task);
        Ok(())
    }
}

/// Store inode, title, and file for `path`; returns the file.
pub fn seed_file(repo: &dyn Repository, catalog: &str, path: &str, inode: u64) -> FileRecord {
    repo.insert_inode(&InodeRecord {
        id: InodeId(inode),
        filesize: 1024,
        checked: false,
    })
    .unwrap();
    let title = repo.insert_title(catalog, &DisplayNames::default()).unwrap();
    let path = PathBuf::from(path);
    repo.insert_file(&NewFile {
        title_id: title.id,
        filename: path.file_name().unwrap().to_string_lossy().into_owned(),
        path,
        part_index: 1,
        inode_id: InodeId(inode),
    })
    .unwrap()
}

pub fn checker(runner: Arc<ScriptedRunner>, clock: Option<Arc<ManualClock>>) -> ConsistencyChecker {
    checker_with(runner, clock, ProbeConfig::default())
}

pub fn checker_with(
    runner: Arc<ScriptedRunner>,
    clock: Option<Arc<ManualClock>>,
    config: ProbeConfig,
) -> ConsistencyChecker {
    match clock {
        Some(clock) => ConsistencyChecker::with_clock(runner, config, clock),
        None => ConsistencyChecker::new(runner, config),
    }
}

pub fn orchestrator(
    repo: &Arc<MemoryRepository>,
    runner: &Arc<ScriptedRunner>,
    queue: &Arc<RecordingQueue>,
) -> PipelineOrchestrator {
    let repository: Arc<dyn Repository> = repo.clone();
    let task_queue: Arc<dyn TaskQueue> = queue.clone();
    PipelineOrchestrator::new(
        repository,
        Arc::new(checker(Arc::clone(runner), None)),
        task_queue,
        true,
    )
}
