//! Task queue with explicit acknowledgement.
//!
//! The queue owns both ends of an unbounded crossbeam channel, so a send can only fail after
//! [`ChannelQueue::close`]; `publish_all` checks that once up front and is therefore all-or-none.

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::types::Task;

/// Publishing side of the queue, as seen by the orchestrator.
pub trait TaskQueue: Send + Sync {
    /// Publish every task or none of them.
    fn publish_all(&self, tasks: &[Task]) -> Result<()>;

    fn publish(&self, task: Task) -> Result<()> {
        self.publish_all(&[task])
    }
}

/// A task handed to one worker; must be acked or nacked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub task: Task,
    /// 1 on first delivery, bumped by [`ChannelQueue::retry`].
    pub attempt: u32,
}

pub struct ChannelQueue {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<u64, Task>>,
    /// Published but not yet acked/nacked; zero means the queue is drained.
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Wait up to `timeout` for the next task and mark it in flight.
    pub fn receive(&self, timeout: Duration) -> Option<Delivery> {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => {
                if let Ok(mut in_flight) = self.in_flight.lock() {
                    in_flight.insert(delivery.id, delivery.task);
                }
                Some(delivery)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Task finished.
    pub fn ack(&self, delivery: &Delivery) {
        self.settle(delivery, "ack");
    }

    /// Task abandoned; it is not redelivered. Failed verifications stay retryable in storage.
    pub fn nack(&self, delivery: &Delivery) {
        self.settle(delivery, "nack");
    }

    /// Put an in-flight task back at the end of the queue with its attempt count bumped.
    /// Allowed after [`close`](Self::close): the task was already accepted once.
    pub fn retry(&self, delivery: &Delivery) -> Result<()> {
        if !self.take_in_flight(delivery.id) {
            bail!("retry for unknown delivery #{} ({})", delivery.id, delivery.task);
        }
        let again = Delivery {
            attempt: delivery.attempt + 1,
            ..*delivery
        };
        debug!("retry {} #{} (attempt {})", again.task, again.id, again.attempt);
        // Cannot fail: `self.rx` keeps the channel connected.
        let _ = self.tx.send(again);
        Ok(())
    }

    fn take_in_flight(&self, id: u64) -> bool {
        self.in_flight
            .lock()
            .map(|mut m| m.remove(&id).is_some())
            .unwrap_or(false)
    }

    fn settle(&self, delivery: &Delivery, how: &str) {
        if self.take_in_flight(delivery.id) {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            debug!("{} {} #{}", how, delivery.task, delivery.id);
        } else {
            warn!("{} for unknown delivery #{} ({})", how, delivery.id, delivery.task);
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Nothing queued and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    /// Refuse further publishes. Already queued tasks can still be received.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Remove and return everything still queued (not in flight).
    pub fn drain_pending(&self) -> Vec<Task> {
        let drained: Vec<Task> = self.rx.try_iter().map(|d| d.task).collect();
        self.outstanding.fetch_sub(drained.len(), Ordering::AcqRel);
        drained
    }
}

impl TaskQueue for ChannelQueue {
    fn publish_all(&self, tasks: &[Task]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("task queue closed; dropped {} task(s)", tasks.len());
        }
        self.outstanding.fetch_add(tasks.len(), Ordering::AcqRel);
        for &task in tasks {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!("publish {} #{}", task, id);
            // Cannot fail: `self.rx` keeps the channel connected.
            let _ = self.tx.send(Delivery { id, task, attempt: 1 });
        }
        Ok(())
    }
}
