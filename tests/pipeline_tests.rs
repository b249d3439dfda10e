//! Orchestrator and checker tests: idempotence, fan-out, keepalive, timeout, dedup, races.

mod common;

use common::{
    FlakyRepository, FlakySink, RecordingQueue, ScriptedRunner, Step, checker, checker_with,
    corrupt, healthy, orchestrator, seed_file,
};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use vidingest::pipeline::{
    ChannelQueue, CollectingSink, DownstreamSink, PipelineOrchestrator, RunControl, TaskOutcome,
    TaskQueue, Worker, join_workers, spawn_workers,
};
use vidingest::probe::{CheckHooks, ManualClock, NoopHooks, OutputKind, ProbeConfig, Progress};
use vidingest::repository::{MemoryRepository, Repository};
use vidingest::{
    CheckStatus, FileId, HashAlgorithm, InodeId, NewFile, OrchestratorError,
    ProbeError, Task,
};

// --- idempotence ---

#[test]
fn test_verify_commits_then_skips_checked_file() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);

    let first = orch.verify(file.id).unwrap();
    assert!(matches!(first, TaskOutcome::Committed { dispatched: 3, .. }));
    assert_eq!(runner.runs(), 1);

    let second = orch.verify(file.id).unwrap();
    assert_eq!(second, TaskOutcome::Skipped);
    assert_eq!(runner.runs(), 1);
    assert_eq!(queue.publish_calls(), 1);
    assert_eq!(queue.published().len(), 3);
}

#[test]
fn test_missing_file_is_error() {
    let repo = Arc::new(MemoryRepository::new());
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);
    match orch.verify(FileId(42)) {
        Err(OrchestratorError::MissingFile(id)) => assert_eq!(id, FileId(42)),
        other => panic!("expected MissingFile, got {other:?}"),
    }
    assert_eq!(runner.runs(), 0);
}

#[test]
fn test_handle_ignores_downstream_tasks() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);
    let outcome = orch
        .handle(&Task::GenerateThumbnail { file_id: file.id })
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Skipped);
    assert_eq!(runner.runs(), 0);
}

// --- fan-out ---

#[test]
fn test_consistent_verdict_fans_out_after_commit() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    orchestrator(&repo, &runner, &queue).verify(file.id).unwrap();

    let published = queue.published();
    assert_eq!(published, Task::fan_out(file.id).to_vec());
    let thumbnails = published
        .iter()
        .filter(|t| matches!(t, Task::GenerateThumbnail { .. }))
        .count();
    let algorithms: Vec<HashAlgorithm> = published
        .iter()
        .filter_map(|t| match t {
            Task::ComputeHash { algorithm, .. } => Some(*algorithm),
            _ => None,
        })
        .collect();
    assert_eq!(thumbnails, 1);
    assert_eq!(algorithms.len(), 2);
    assert_ne!(algorithms[0], algorithms[1]);
    assert!(queue.durable_at_publish().iter().all(|d| *d));

    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Consistent);
    assert_eq!(stored.length_ms, Some(600_000));
    assert!(repo.inode(InodeId(10)).unwrap().unwrap().checked);
}

#[test]
fn test_inconsistent_verdict_dispatches_nothing() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(corrupt()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let outcome = orchestrator(&repo, &runner, &queue).verify(file.id).unwrap();
    assert_eq!(outcome.dispatched(), 0);
    assert!(queue.published().is_empty());
    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Inconsistent);
}

// --- probe failures ---

#[test]
fn test_probe_failure_marks_failed_and_stays_retryable() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::failing_spawn());
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    match orchestrator(&repo, &runner, &queue).verify(file.id) {
        Err(OrchestratorError::Probe { file_id, source }) => {
            assert_eq!(file_id, file.id);
            assert!(matches!(source, ProbeError::Spawn { .. }));
        }
        other => panic!("expected probe error, got {other:?}"),
    }
    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Failed);
    assert!(queue.published().is_empty());

    // Retry with a working probe.
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let outcome = orchestrator(&repo, &runner, &queue).verify(file.id).unwrap();
    assert_eq!(outcome.dispatched(), 3);
    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Consistent);
    assert_eq!(stored.last_error, None);
}

#[test]
fn test_abnormal_exit_without_signal_is_error() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(vec![
        Step::Out("/lib/ABC-123.mkv: Permission denied"),
        Step::Exit(Some(1)),
    ]));
    let err = checker(runner, None)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap_err();
    match err {
        ProbeError::AbnormalExit { code, tail, .. } => {
            assert_eq!(code, 1);
            assert!(tail.contains("Permission denied"));
        }
        other => panic!("expected AbnormalExit, got {other}"),
    }
}

#[test]
fn test_killed_probe_is_crash() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(vec![Step::Exit(None)]));
    let err = checker(runner, None)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap_err();
    assert!(matches!(err, ProbeError::Crashed { .. }));
}

#[test]
fn test_strict_mode_fails_clean_exit_with_corruption() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let script = vec![
        Step::Out("[h264 @ 0x1] concealing 120 DC, 120 AC, 120 MV errors in P frame"),
        Step::Exit(Some(0)),
    ];
    let strict = checker(Arc::new(ScriptedRunner::new(script.clone())), None)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap();
    assert!(!strict.consistent);
    let lenient = checker(Arc::new(ScriptedRunner::new(script)), None)
        .check_health(&file, false, &mut NoopHooks)
        .unwrap();
    assert!(lenient.consistent);
}

#[test]
fn test_path_and_metadata_are_not_corruption_signals() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(
        repo.as_ref(),
        "ABC-123",
        "/lib/Corrupted Backups/ABC-123.mkv",
        10,
    );
    let healthy_run = vec![
        Step::Out("Input #0, matroska,webm, from '/lib/Corrupted Backups/ABC-123.mkv':"),
        Step::Out("  Metadata:"),
        Step::Out("    title           : Truncated Edition (partial file restored)"),
        Step::Out("  Duration: 00:10:00.00, start: 0.000000, bitrate: 2000 kb/s"),
        Step::Out("Output #0, null, to 'pipe:':"),
        Step::Out("frame=18000 fps=900 q=-0.0 size=N/A time=00:10:00.00 bitrate=N/A speed=30x"),
        Step::Exit(Some(0)),
    ];
    let verdict = checker(Arc::new(ScriptedRunner::new(healthy_run)), None)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap();
    assert!(verdict.consistent);
    assert_eq!(verdict.length_ms, Some(600_000));

    // A real diagnostic still counts when it is prefixed with the same path.
    let unreadable = vec![
        Step::Out("/lib/Corrupted Backups/ABC-123.mkv: Invalid data found when processing input"),
        Step::Exit(Some(1)),
    ];
    let verdict = checker(Arc::new(ScriptedRunner::new(unreadable)), None)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap();
    assert!(verdict.checked);
    assert!(!verdict.consistent);
}

// --- progress and keepalive ---

#[derive(Default)]
struct RecordingHooks {
    clock: Option<Arc<ManualClock>>,
    keepalives: Vec<Duration>,
    progress: Vec<Progress>,
    lines: usize,
}

impl CheckHooks for RecordingHooks {
    fn on_output(&mut self, _kind: OutputKind, _text: &str) {
        self.lines += 1;
    }

    fn on_progress(&mut self, progress: &Progress) {
        self.progress.push(*progress);
    }

    fn keepalive(&mut self) -> anyhow::Result<()> {
        let at = self.clock.as_ref().map(|c| c.elapsed()).unwrap_or_default();
        self.keepalives.push(at);
        Ok(())
    }
}

#[test]
fn test_progress_percent_uses_probed_length() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let mut hooks = RecordingHooks::default();
    let verdict = checker(Arc::new(ScriptedRunner::new(healthy())), None)
        .check_health(&file, true, &mut hooks)
        .unwrap();
    assert!(verdict.consistent);
    assert_eq!(hooks.lines, 3);
    let percents: Vec<Option<f64>> = hooks.progress.iter().map(|p| p.percent).collect();
    assert_eq!(percents, vec![Some(50.0), Some(100.0)]);
}

#[test]
fn test_keepalive_fires_during_silent_probe() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let clock = Arc::new(ManualClock::new());
    let runner = Arc::new(
        ScriptedRunner::new(vec![
            Step::Out("Duration: 00:01:40.00, start: 0.000000"),
            Step::Idle(Duration::from_secs(95)),
            Step::Exit(Some(0)),
        ])
        .with_clock(Arc::clone(&clock)),
    );
    let mut hooks = RecordingHooks {
        clock: Some(Arc::clone(&clock)),
        ..Default::default()
    };
    let verdict = checker(runner, Some(Arc::clone(&clock)))
        .check_health(&file, true, &mut hooks)
        .unwrap();
    assert!(verdict.consistent);
    assert!(hooks.progress.is_empty());
    assert!(hooks.keepalives.len() >= 2, "{:?}", hooks.keepalives);
    for pair in hooks.keepalives.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(30));
    }
    assert!(clock.elapsed() >= Duration::from_secs(90));
}

#[test]
fn test_keepalive_pings_repository() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let clock = Arc::new(ManualClock::new());
    let runner = Arc::new(
        ScriptedRunner::new(vec![
            Step::Idle(Duration::from_secs(70)),
            Step::Exit(Some(0)),
        ])
        .with_clock(Arc::clone(&clock)),
    );
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let repository: Arc<dyn Repository> = repo.clone();
    let task_queue: Arc<dyn TaskQueue> = queue.clone();
    let orch = PipelineOrchestrator::new(
        repository,
        Arc::new(checker(runner, Some(clock))),
        task_queue,
        true,
    );
    orch.verify(file.id).unwrap();
    assert_eq!(repo.ping_count(), 2);
}

#[test]
fn test_hard_timeout_kills_probe() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let clock = Arc::new(ManualClock::new());
    let runner = Arc::new(
        ScriptedRunner::new(vec![
            Step::Idle(Duration::from_secs(3600)),
            Step::Exit(Some(0)),
        ])
        .with_clock(Arc::clone(&clock)),
    );
    let config = ProbeConfig {
        timeout: Duration::from_secs(100),
        ..ProbeConfig::default()
    };
    let err = checker_with(Arc::clone(&runner), Some(Arc::clone(&clock)), config)
        .check_health(&file, true, &mut NoopHooks)
        .unwrap_err();
    match err {
        ProbeError::TimedOut { limit, .. } => assert_eq!(limit, Duration::from_secs(100)),
        other => panic!("expected TimedOut, got {other}"),
    }
    assert!(runner.was_killed());
    assert_eq!(clock.elapsed(), Duration::from_secs(100));
}

#[test]
fn test_observer_sees_raw_output() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(corrupt()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let orch = orchestrator(&repo, &runner, &queue).with_observer(Arc::new(
        move |file_id: FileId, kind: OutputKind, text: &str| {
            sink.lock().unwrap().push((file_id, kind, text.to_string()));
        },
    ));
    orch.verify(file.id).unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(id, kind, _)| *id == file.id && *kind == OutputKind::Stderr));
    assert!(seen[1].2.contains("Invalid data found"));
}

// --- persistence failures ---

#[test]
fn test_failed_commit_dispatches_nothing() {
    let inner = Arc::new(MemoryRepository::new());
    let file = seed_file(inner.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let repo = Arc::new(FlakyRepository::new(Arc::clone(&inner)));
    repo.fail_commits(true);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&inner)));
    let repository: Arc<dyn Repository> = repo.clone();
    let task_queue: Arc<dyn TaskQueue> = queue.clone();
    let orch = PipelineOrchestrator::new(
        repository,
        Arc::new(checker(Arc::clone(&runner), None)),
        task_queue,
        true,
    );

    assert!(matches!(
        orch.verify(file.id),
        Err(OrchestratorError::Repository(_))
    ));
    assert_eq!(runner.runs(), 1);
    assert_eq!(queue.publish_calls(), 0);
    let stored = inner.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Unchecked);
    assert!(!inner.inode(InodeId(10)).unwrap().unwrap().checked);

    repo.fail_commits(false);
    assert_eq!(orch.verify(file.id).unwrap().dispatched(), 3);
    assert_eq!(queue.published(), Task::fan_out(file.id).to_vec());
}

#[test]
fn test_refused_publish_is_redispatched() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);

    queue.set_refusing(true);
    assert!(matches!(
        orch.verify(file.id),
        Err(OrchestratorError::Repository(_))
    ));
    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Consistent);
    assert!(!stored.dispatched);
    assert!(queue.published().is_empty());
    // The verdict stands; a second verify does not re-probe or re-publish.
    assert_eq!(orch.verify(file.id).unwrap(), TaskOutcome::Skipped);

    queue.set_refusing(false);
    assert_eq!(orch.redispatch_undelivered().unwrap(), 1);
    assert_eq!(queue.published(), Task::fan_out(file.id).to_vec());
    assert!(repo.file(file.id).unwrap().unwrap().dispatched);
    assert_eq!(orch.redispatch_undelivered().unwrap(), 0);
    assert_eq!(runner.runs(), 1);
}

fn channel_worker(
    repo: &Arc<MemoryRepository>,
    runner: &Arc<ScriptedRunner>,
    queue: &Arc<ChannelQueue>,
    sink: Arc<dyn DownstreamSink>,
) -> Worker {
    let repository: Arc<dyn Repository> = repo.clone();
    let task_queue: Arc<dyn TaskQueue> = queue.clone();
    Worker {
        orchestrator: PipelineOrchestrator::new(
            repository,
            Arc::new(checker(Arc::clone(runner), None)),
            task_queue,
            true,
        ),
        sink,
    }
}

#[test]
fn test_refused_downstream_task_is_retried() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(ChannelQueue::new());
    let sink = Arc::new(FlakySink::new(2));
    queue.publish(Task::VerifyFile { file_id: file.id }).unwrap();

    let control = RunControl::default();
    control.close_input();
    let handles = spawn_workers(&queue, 1, &control, |_| {
        Ok(channel_worker(&repo, &runner, &queue, sink.clone()))
    })
    .unwrap();
    let stats = join_workers(handles);

    assert!(queue.is_drained());
    assert_eq!(stats.downstream, 3);
    assert_eq!(stats.lost, 0);
    assert_eq!(sink.attempts(), 5);
    let mut accepted = sink.accepted();
    accepted.sort_by_key(|t| t.to_string());
    let mut expected = Task::fan_out(file.id).to_vec();
    expected.sort_by_key(|t| t.to_string());
    assert_eq!(accepted, expected);
    assert!(repo.file(file.id).unwrap().unwrap().dispatched);
}

#[test]
fn test_lost_downstream_tasks_are_redispatched_next_run() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let runner = Arc::new(ScriptedRunner::new(healthy()));

    // First run: the sink refuses everything.
    let queue = Arc::new(ChannelQueue::new());
    let broken = Arc::new(FlakySink::broken());
    queue.publish(Task::VerifyFile { file_id: file.id }).unwrap();
    let control = RunControl::default();
    control.close_input();
    let handles = spawn_workers(&queue, 1, &control, |_| {
        Ok(channel_worker(&repo, &runner, &queue, broken.clone()))
    })
    .unwrap();
    let stats = join_workers(handles);
    assert_eq!(stats.verified, 1);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.downstream, 0);
    assert_eq!(stats.lost, 3);
    assert_eq!(broken.attempts(), 9);
    let stored = repo.file(file.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Consistent);
    assert!(!stored.dispatched);
    assert_eq!(
        repo.undispatched_files().unwrap().iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![file.id]
    );

    // Second run: the fan-out is published again without probing.
    let queue = Arc::new(ChannelQueue::new());
    let sink = Arc::new(CollectingSink::default());
    let main = channel_worker(&repo, &runner, &queue, sink.clone());
    assert_eq!(main.orchestrator.redispatch_undelivered().unwrap(), 1);
    let control = RunControl::default();
    control.close_input();
    let handles = spawn_workers(&queue, 1, &control, |_| {
        Ok(channel_worker(&repo, &runner, &queue, sink.clone()))
    })
    .unwrap();
    let stats = join_workers(handles);
    assert_eq!(stats.downstream, 3);
    assert_eq!(runner.runs(), 1);
    assert_eq!(sink.tasks().len(), 3);
    assert!(repo.undispatched_files().unwrap().is_empty());
}

// --- inode dedup ---

#[test]
fn test_hard_link_adopts_sibling_verdict() {
    let repo = Arc::new(MemoryRepository::new());
    let first = seed_file(repo.as_ref(), "ABC-123", "/lib/a/ABC-123.mkv", 10);
    let second = repo
        .insert_file(&NewFile {
            title_id: first.title_id,
            filename: "ABC-123.mkv".to_string(),
            path: "/lib/b/ABC-123.mkv".into(),
            part_index: 1,
            inode_id: InodeId(10),
        })
        .unwrap();
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);

    orch.verify(first.id).unwrap();
    let outcome = orch.verify(second.id).unwrap();
    assert!(matches!(outcome, TaskOutcome::Adopted { dispatched: 3, .. }));
    assert_eq!(runner.runs(), 1);
    let stored = repo.file(second.id).unwrap().unwrap();
    assert_eq!(stored.status(), CheckStatus::Consistent);
    assert_eq!(stored.length_ms, Some(600_000));
}

#[test]
fn test_distinct_inodes_are_both_probed() {
    let repo = Arc::new(MemoryRepository::new());
    let a = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123-cd1.mkv", 10);
    let b = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123-cd2.mkv", 11);
    assert_eq!(a.title_id, b.title_id);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);
    orch.verify(a.id).unwrap();
    orch.verify(b.id).unwrap();
    assert_eq!(runner.runs(), 2);
    assert_eq!(queue.published().len(), 6);
}

// --- verify_title ---

#[test]
fn test_verify_title_queues_unchecked_and_force_resets() {
    let repo = Arc::new(MemoryRepository::new());
    let a = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123-cd1.mkv", 10);
    let b = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123-cd2.mkv", 11);
    let runner = Arc::new(ScriptedRunner::new(corrupt()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let orch = orchestrator(&repo, &runner, &queue);
    orch.verify(a.id).unwrap();

    assert_eq!(orch.verify_title(a.title_id, false).unwrap(), 1);
    assert_eq!(
        queue.published(),
        vec![Task::VerifyFile { file_id: b.id }]
    );

    assert_eq!(orch.verify_title(a.title_id, true).unwrap(), 2);
    assert_eq!(
        repo.file(a.id).unwrap().unwrap().status(),
        CheckStatus::Unchecked
    );
    assert!(!repo.inode(InodeId(10)).unwrap().unwrap().checked);
}

#[test]
fn test_enqueue_unchecked_includes_failed_files() {
    let repo = Arc::new(MemoryRepository::new());
    let a = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let b = seed_file(repo.as_ref(), "XYZ-001", "/lib/XYZ-001.mkv", 11);
    repo.mark_failed(b.id, "probe exited with status 1").unwrap();
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let n = orchestrator(&repo, &runner, &queue).enqueue_unchecked().unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        queue.published(),
        vec![
            Task::VerifyFile { file_id: a.id },
            Task::VerifyFile { file_id: b.id }
        ]
    );
}

// --- concurrent verdicts ---

#[test]
fn test_racing_workers_commit_once() {
    let repo = Arc::new(MemoryRepository::new());
    let file = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let barrier = Arc::new(Barrier::new(2));
    let runner = Arc::new(ScriptedRunner::new(healthy()).with_barrier(barrier));
    let queue = Arc::new(RecordingQueue::new(Arc::clone(&repo)));
    let results = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let orch = orchestrator(&repo, &runner, &queue);
            let results = Arc::clone(&results);
            thread::spawn(move || {
                let r = orch.verify(file.id);
                results.lock().unwrap().push(r);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let results = results.lock().unwrap();
    let committed = results
        .iter()
        .filter(|r| matches!(r, Ok(TaskOutcome::Committed { .. })))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::Conflict(_))))
        .count();
    assert_eq!(runner.runs(), 2);
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(queue.published().len(), 3);
    assert_eq!(repo.file(file.id).unwrap().unwrap().version, 1);
}

// --- workers over the channel queue ---

#[test]
fn test_workers_drain_queue_and_route_downstream() {
    let repo = Arc::new(MemoryRepository::new());
    let a = seed_file(repo.as_ref(), "ABC-123", "/lib/ABC-123.mkv", 10);
    let b = seed_file(repo.as_ref(), "XYZ-001", "/lib/XYZ-001.mkv", 11);
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let queue = Arc::new(ChannelQueue::new());
    let sink = Arc::new(CollectingSink::default());
    queue
        .publish_all(&[
            Task::VerifyFile { file_id: a.id },
            Task::VerifyFile { file_id: b.id },
            Task::VerifyFile { file_id: FileId(99) },
        ])
        .unwrap();

    let control = RunControl::default();
    control.close_input();
    let handles = spawn_workers(&queue, 2, &control, |_| {
        let repository: Arc<dyn Repository> = repo.clone();
        let task_queue: Arc<dyn TaskQueue> = queue.clone();
        Ok(Worker {
            orchestrator: PipelineOrchestrator::new(
                repository,
                Arc::new(checker(Arc::clone(&runner), None)),
                task_queue,
                true,
            ),
            sink: sink.clone(),
        })
    })
    .unwrap();
    let stats = join_workers(handles);

    assert!(queue.is_drained());
    assert_eq!(stats.verified, 2);
    assert_eq!(stats.consistent, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dispatched, 6);
    assert_eq!(stats.downstream, 6);
    let mut accepted = sink.tasks();
    accepted.sort_by_key(|t| t.file_id());
    assert_eq!(accepted.len(), 6);
    assert!(accepted.iter().all(|t| t.is_downstream()));
}

#[test]
fn test_shutdown_leaves_queue_untouched() {
    let queue = Arc::new(ChannelQueue::new());
    queue.publish(Task::VerifyFile { file_id: FileId(1) }).unwrap();
    let control = RunControl::default();
    control.request_shutdown();
    let repo = Arc::new(MemoryRepository::new());
    let runner = Arc::new(ScriptedRunner::new(healthy()));
    let handles = spawn_workers(&queue, 1, &control, |_| {
        let repository: Arc<dyn Repository> = repo.clone();
        let task_queue: Arc<dyn TaskQueue> = queue.clone();
        Ok(Worker {
            orchestrator: PipelineOrchestrator::new(
                repository,
                Arc::new(checker(Arc::clone(&runner), None)),
                task_queue,
                true,
            ),
            sink: Arc::new(CollectingSink::default()),
        })
    })
    .unwrap();
    let stats = join_workers(handles);
    assert_eq!(stats.verified, 0);
    assert_eq!(queue.pending(), 1);
    assert_eq!(queue.drain_pending(), vec![Task::VerifyFile { file_id: FileId(1) }]);
    assert!(queue.is_drained());
}
