//! Worker threads: receive deliveries, route verification to the orchestrator and everything
//! else to the downstream sink, then ack or nack.

use anyhow::Result;
use log::{debug, error, warn};
use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::OrchestratorError;
use crate::utils::config::WorkerLimits;

use super::downstream::DownstreamSink;
use super::orchestrator::{PipelineOrchestrator, TaskOutcome};
use super::queue::{ChannelQueue, Delivery};

/// Everything one worker thread owns.
pub struct Worker {
    pub orchestrator: PipelineOrchestrator,
    pub sink: Arc<dyn DownstreamSink>,
}

/// Stop conditions shared by all workers of a run.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    /// Set on Ctrl+C: finish the current task, then exit.
    pub shutdown: Arc<AtomicBool>,
    /// Set once nothing but the workers themselves will publish. Workers exit when the queue
    /// is drained after this.
    pub input_closed: Arc<AtomicBool>,
}

impl RunControl {
    pub fn close_input(&self) {
        self.input_closed.store(true, Ordering::Release);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub verified: usize,
    pub adopted: usize,
    pub skipped: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub dispatched: usize,
    pub downstream: usize,
    /// Downstream tasks given up after every attempt failed; their files are redispatched later.
    pub lost: usize,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, o: Self) {
        self.verified += o.verified;
        self.adopted += o.adopted;
        self.skipped += o.skipped;
        self.consistent += o.consistent;
        self.inconsistent += o.inconsistent;
        self.failed += o.failed;
        self.conflicts += o.conflicts;
        self.dispatched += o.dispatched;
        self.downstream += o.downstream;
        self.lost += o.lost;
    }
}

/// Spawn `num_workers` threads; `make` builds each thread's [`Worker`] (own storage connection).
pub fn spawn_workers<F>(
    queue: &Arc<ChannelQueue>,
    num_workers: usize,
    control: &RunControl,
    make: F,
) -> Result<Vec<JoinHandle<WorkerStats>>>
where
    F: Fn(usize) -> Result<Worker>,
{
    let n = WorkerLimits::clamp(num_workers);
    let mut handles = Vec::with_capacity(n);
    for idx in 0..n {
        let worker = make(idx)?;
        let queue = Arc::clone(queue);
        let control = control.clone();
        let handle = thread::Builder::new()
            .name(format!("verify-{idx}"))
            .spawn(move || worker_loop(idx, worker, &queue, &control))?;
        handles.push(handle);
    }
    debug!("spawned {} worker(s)", n);
    Ok(handles)
}

/// Join all workers and sum their stats. A panicked worker is logged and counts nothing.
pub fn join_workers(handles: Vec<JoinHandle<WorkerStats>>) -> WorkerStats {
    let mut total = WorkerStats::default();
    for h in handles {
        match h.join() {
            Ok(stats) => total += stats,
            Err(_) => error!("worker thread panicked"),
        }
    }
    total
}

fn worker_loop(idx: usize, worker: Worker, queue: &ChannelQueue, control: &RunControl) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while !control.is_shutdown() {
        match queue.receive(WorkerLimits::QUEUE_POLL_INTERVAL) {
            Some(delivery) => process(&worker, queue, &delivery, &mut stats),
            None => {
                if control.input_closed.load(Ordering::Acquire) && queue.is_drained() {
                    break;
                }
            }
        }
    }
    debug!("worker {} exiting: {:?}", idx, stats);
    stats
}

/// Handle one delivery and settle it on the queue.
pub fn process(worker: &Worker, queue: &ChannelQueue, delivery: &Delivery, stats: &mut WorkerStats) {
    if delivery.task.is_downstream() {
        deliver_downstream(worker, queue, delivery, stats);
        return;
    }

    match worker.orchestrator.handle(&delivery.task) {
        Ok(outcome) => {
            match &outcome {
                TaskOutcome::Skipped => stats.skipped += 1,
                TaskOutcome::Adopted { record, .. } | TaskOutcome::Committed { record, .. } => {
                    if matches!(outcome, TaskOutcome::Adopted { .. }) {
                        stats.adopted += 1;
                    } else {
                        stats.verified += 1;
                    }
                    if record.consistent {
                        stats.consistent += 1;
                    } else {
                        stats.inconsistent += 1;
                    }
                }
            }
            stats.dispatched += outcome.dispatched();
            queue.ack(delivery);
        }
        Err(OrchestratorError::Conflict(conflict)) => {
            warn!("{}", conflict);
            stats.conflicts += 1;
            queue.ack(delivery);
        }
        Err(e) => {
            // Probe failures are logged by the orchestrator.
            if !matches!(e, OrchestratorError::Probe { .. }) {
                error!("{} failed: {}", delivery.task, e);
            }
            stats.failed += 1;
            queue.nack(delivery);
        }
    }
}

/// Hand a downstream task to the sink. Failures are redelivered with backoff; once the attempts
/// run out the file's fan-out is flagged lost so a later run publishes it again.
fn deliver_downstream(worker: &Worker, queue: &ChannelQueue, delivery: &Delivery, stats: &mut WorkerStats) {
    let err = match worker.sink.accept(&delivery.task) {
        Ok(()) => {
            stats.downstream += 1;
            queue.ack(delivery);
            return;
        }
        Err(e) => e,
    };
    if delivery.attempt < WorkerLimits::DOWNSTREAM_ATTEMPTS {
        warn!(
            "downstream task {} failed (attempt {}): {:#}",
            delivery.task, delivery.attempt, err
        );
        thread::sleep(WorkerLimits::DOWNSTREAM_BACKOFF * delivery.attempt);
        if let Err(e) = queue.retry(delivery) {
            error!("{:#}", e);
            queue.nack(delivery);
        }
        return;
    }
    error!(
        "downstream task {} failed after {} attempts: {:#}",
        delivery.task, delivery.attempt, err
    );
    stats.lost += 1;
    if let Err(e) = worker.orchestrator.fan_out_lost(delivery.task.file_id()) {
        error!("could not flag lost fan-out of file {}: {}", delivery.task.file_id(), e);
    }
    queue.nack(delivery);
}
