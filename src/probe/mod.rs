//! Media-probe collaborator, progress parsing, keepalive timing, and the consistency checker.

pub mod checker;
pub mod ffmpeg;
pub mod keepalive;
pub mod progress;

pub use checker::{CheckHooks, ConsistencyChecker, NoopHooks};
pub use ffmpeg::FfmpegProbe;
pub use keepalive::{Clock, KeepaliveTicker, ManualClock, SystemClock};
pub use progress::{Progress, parse_duration_marker, parse_time_marker};

use std::path::Path;
use std::time::Duration;

use crate::error::ProbeError;
use crate::utils::config::ProbeConsts;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

/// One line (split at `\n` or `\r`) of probe output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputChunk {
    pub kind: OutputKind,
    pub text: String,
}

/// Exit status of the probe process. `code` is None when it was killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeEvent {
    Output(OutputChunk),
    /// Terminal event; nothing follows it.
    Exited(ExitInfo),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeRecv {
    Event(ProbeEvent),
    /// The wait elapsed without output.
    Idle,
    /// Stream already finished.
    Closed,
}

/// A running probe invocation.
pub trait ProbeSession: Send {
    /// Wait up to `timeout` for the next event.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<ProbeRecv, ProbeError>;

    /// Terminate the probe; used on timeout.
    fn kill(&mut self);
}

/// Starts probe invocations. Implemented by [`FfmpegProbe`]; tests script their own.
pub trait ProbeRunner: Send + Sync {
    fn run(&self, path: &Path, strict: bool) -> Result<Box<dyn ProbeSession>, ProbeError>;
}

/// Probe invocation and verdict tuning.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub program: String,
    /// Extra arguments inserted before `-i`.
    pub extra_args: Vec<String>,
    pub keepalive_interval: Duration,
    pub timeout: Duration,
    /// Lowercase substrings that count as corruption / unreadable-stream signals.
    pub corruption_signals: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: ProbeConsts::PROGRAM.to_string(),
            extra_args: Vec::new(),
            keepalive_interval: ProbeConsts::KEEPALIVE_INTERVAL,
            timeout: ProbeConsts::TIMEOUT,
            corruption_signals: ProbeConsts::default_corruption_signals(),
        }
    }
}
