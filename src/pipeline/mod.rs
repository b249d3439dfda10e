//! Pipeline components: walk, registrar, task queue, orchestrator, workers.

pub mod downstream;
pub mod orchestrator;
pub mod queue;
pub mod register;
pub mod walk;
pub mod worker;

pub use downstream::{CollectingSink, DownstreamSink};
pub use orchestrator::{OutputObserver, PipelineOrchestrator, TaskOutcome};
pub use queue::{ChannelQueue, Delivery, TaskQueue};
pub use register::{Registrar, ScanReport};
pub use walk::{WalkContext, WalkOutcome, WalkSummary, run_walk_loop, spawn_walk_thread};
pub use worker::{RunControl, Worker, WorkerStats, join_workers, spawn_workers};
