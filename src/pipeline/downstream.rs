//! Consumers of the tasks fanned out after a consistent verdict.

use anyhow::Result;
use std::sync::Mutex;

use crate::types::Task;

/// Receives thumbnail and hash tasks. The algorithms behind them live elsewhere.
pub trait DownstreamSink: Send + Sync {
    fn accept(&self, task: &Task) -> Result<()>;
}

/// Keeps every accepted task in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    tasks: Mutex<Vec<Task>>,
}

impl CollectingSink {
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl DownstreamSink for CollectingSink {
    fn accept(&self, task: &Task) -> Result<()> {
        self.tasks
            .lock()
            .map_err(|_| anyhow::anyhow!("collecting sink lock poisoned"))?
            .push(*task);
        Ok(())
    }
}
