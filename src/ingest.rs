//! Scan and verify runs: walk → register → verify workers, against the SQLite catalog.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::Settings;
use crate::engine::SqliteRepository;
use crate::engine::progress::{BatchedProgress, create_counter, refresh_bar};
use crate::engine::resolver::DuplicateResolver;
use crate::engine::tools::{check_root_and_canonicalize, default_db_path};
use crate::identity::IdentityExtractor;
use crate::pipeline::{
    ChannelQueue, PipelineOrchestrator, Registrar, RunControl, ScanReport,
    TaskQueue, WalkContext, Worker, WorkerStats, join_workers, spawn_walk_thread, spawn_workers,
};
use crate::probe::{ConsistencyChecker, FfmpegProbe, OutputKind};
use crate::repository::Repository;
use crate::types::FileId;
use crate::utils::config::{PROGRESS_UPDATE_BATCH_SIZE, PackagePaths, WALK_CHANNEL_CAP};

/// Totals of one run.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Set by scans only.
    pub scan: Option<ScanReport>,
    /// Verification tasks queued before the workers drained the queue.
    pub queued: usize,
    pub workers: WorkerStats,
    /// Tasks left unprocessed after a Ctrl+C. Their files stay unchecked in the catalog.
    pub abandoned: usize,
}

/// Worker wired to its own connection on `db_path` and an ffmpeg probe.
pub fn build_worker(db_path: &Path, settings: &Settings, queue: &Arc<ChannelQueue>) -> Result<Worker> {
    let repo = Arc::new(SqliteRepository::open(db_path)?);
    let runner = Arc::new(FfmpegProbe::new(&settings.probe));
    let checker = Arc::new(ConsistencyChecker::new(runner, settings.probe.clone()));
    let repository: Arc<dyn Repository> = repo.clone();
    let task_queue: Arc<dyn TaskQueue> = queue.clone();
    let mut orchestrator =
        PipelineOrchestrator::new(repository, checker, task_queue, settings.opts.strict);
    if settings.opts.verbose {
        orchestrator = orchestrator.with_observer(Arc::new(|file_id: FileId, kind: OutputKind, text: &str| {
            debug!("[file {} {:?}] {}", file_id, kind, text);
        }));
    }
    Ok(Worker {
        orchestrator,
        sink: repo,
    })
}

pub(crate) fn start_workers(
    db_path: &Path,
    settings: &Settings,
    queue: &Arc<ChannelQueue>,
    control: &RunControl,
) -> Result<Vec<JoinHandle<WorkerStats>>> {
    spawn_workers(queue, settings.opts.num_workers, control, |_| {
        build_worker(db_path, settings, queue)
    })
}

/// After workers stop: keep already fanned-out work in the outbox and count the verifications
/// left behind. A downstream task the sink refuses flags its file's fan-out as lost.
fn settle_leftovers(queue: &ChannelQueue, main: &Worker) -> usize {
    let mut abandoned = 0;
    for task in queue.drain_pending() {
        if !task.is_downstream() {
            abandoned += 1;
            continue;
        }
        if let Err(e) = main.sink.accept(&task) {
            error!("downstream task {} not recorded: {:#}", task, e);
            if let Err(e) = main.orchestrator.fan_out_lost(task.file_id()) {
                error!("could not flag lost fan-out of file {}: {}", task.file_id(), e);
            }
        }
    }
    abandoned
}

/// Join the workers, refuse further publishes, and settle whatever is still queued.
pub(crate) fn finish_run(
    queue: &ChannelQueue,
    handles: Vec<JoinHandle<WorkerStats>>,
    main: &Worker,
) -> (WorkerStats, usize) {
    let workers = join_workers(handles);
    queue.close();
    let abandoned = settle_leftovers(queue, main);
    (workers, abandoned)
}

/// Queue the fan-out of consistent files whose follow-up tasks were lost in an earlier run.
fn redispatch(main: &Worker) {
    if let Err(e) = main.orchestrator.redispatch_undelivered() {
        error!("could not redispatch follow-up tasks: {}", e);
    }
}

fn resolve_db_path(root: &Path, settings: &Settings) -> PathBuf {
    settings
        .opts
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(root))
}

/// Scan `root` for videos, register them, and verify every unchecked one.
/// With `register_only`, verification is left to a later [`verify_pending`] run.
pub fn scan_dir(root: &Path, settings: &Settings, control: &RunControl) -> Result<RunReport> {
    let root = check_root_and_canonicalize(root)?;
    let db_path = resolve_db_path(&root, settings);
    let repo = Arc::new(
        SqliteRepository::open(&db_path)
            .with_context(|| format!("open catalog {}", db_path.display()))?,
    );
    let queue = Arc::new(ChannelQueue::new());
    let opts = &settings.opts;
    let main = build_worker(&db_path, settings, &queue)?;
    redispatch(&main);

    let handles = if opts.register_only {
        Vec::new()
    } else {
        start_workers(&db_path, settings, &queue, control)?
    };

    let mut exclude = PackagePaths::get().default_exclude_patterns();
    exclude.extend(opts.exclude.iter().cloned());
    let ctx = WalkContext {
        root: root.clone(),
        db_canonical: db_path.canonicalize().ok(),
        exclude,
        extensions: settings.extensions.clone(),
        follow_links: opts.follow_links,
    };
    let (path_tx, path_rx) = bounded::<PathBuf>(WALK_CHANNEL_CAP);
    let walk_handle = spawn_walk_thread(path_tx, ctx);

    let extractor = IdentityExtractor::new(settings.extractor.clone());
    let repository: Arc<dyn Repository> = repo.clone();
    let resolver = DuplicateResolver::new(repository);
    let progress = opts.verbose.then(|| {
        let bar = create_counter("Scanning");
        refresh_bar(&bar);
        BatchedProgress::new(bar, PROGRESS_UPDATE_BATCH_SIZE)
    });
    let on_progress = progress.as_ref().map(|p| move |n: usize| p.tick(n));

    debug!("scanning {}", root.display());
    let registrar = Registrar::new(&extractor, &resolver, queue.as_ref()).with_cancel(&control.shutdown);
    let mut scan = registrar.run(path_rx, on_progress.as_ref().map(|f| f as &dyn Fn(usize)));
    if let Some(p) = &progress {
        p.flush();
    }
    let walk = walk_handle
        .join()
        .map_err(|_| anyhow::anyhow!("walk thread panicked"))?;
    scan.skipped = walk.skipped;
    control.close_input();

    let queued = scan.queued;
    let (workers, abandoned) = finish_run(&queue, handles, &main);
    if opts.register_only {
        info!("{} file(s) registered for verification", abandoned);
    } else if abandoned > 0 {
        warn!("Cancelled; {} file(s) left unchecked", abandoned);
    }
    Ok(RunReport {
        scan: Some(scan),
        queued,
        workers,
        abandoned: if opts.register_only { 0 } else { abandoned },
    })
}

/// Verify every file in the catalog at `db_path` that has no verdict yet, failed ones included.
pub fn verify_pending(db_path: &Path, settings: &Settings, control: &RunControl) -> Result<RunReport> {
    let queue = Arc::new(ChannelQueue::new());
    let main = build_worker(db_path, settings, &queue)?;
    redispatch(&main);
    let queued = main.orchestrator.enqueue_unchecked()?;
    info!("{} file(s) to verify", queued);

    control.close_input();
    let handles = start_workers(db_path, settings, &queue, control)?;
    let (workers, abandoned) = finish_run(&queue, handles, &main);
    if abandoned > 0 {
        warn!("Cancelled; {} file(s) left unchecked", abandoned);
    }
    Ok(RunReport {
        scan: None,
        queued,
        workers,
        abandoned,
    })
}
