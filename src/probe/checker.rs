//! Consistency checker: one probe run → one verdict.

use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;

use super::keepalive::{Clock, KeepaliveTicker, SystemClock};
use super::progress::{Progress, parse_duration_marker, parse_time_marker};
use super::{ExitInfo, OutputKind, ProbeConfig, ProbeEvent, ProbeRecv, ProbeRunner};
use crate::error::ProbeError;
use crate::types::{FileRecord, Verdict};

/// Callbacks driven by [`ConsistencyChecker::check_health`] from the worker's thread.
pub trait CheckHooks {
    /// Every output chunk, as it arrives.
    fn on_output(&mut self, _kind: OutputKind, _text: &str) {}

    /// Parsed decode progress. Diagnostic only.
    fn on_progress(&mut self, _progress: &Progress) {}

    /// Liveness action, due every keepalive interval while the probe runs.
    fn keepalive(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopHooks;

impl CheckHooks for NoopHooks {}

pub struct ConsistencyChecker {
    runner: Arc<dyn ProbeRunner>,
    config: ProbeConfig,
    clock: Arc<dyn Clock>,
}

impl ConsistencyChecker {
    pub fn new(runner: Arc<dyn ProbeRunner>, config: ProbeConfig) -> Self {
        Self::with_clock(runner, config, Arc::new(SystemClock))
    }

    pub fn with_clock(runner: Arc<dyn ProbeRunner>, config: ProbeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run the probe on `file` and derive its verdict.
    ///
    /// Keepalives fire on wall-clock time whether or not output arrives; the probe is killed
    /// once it exceeds the configured timeout.
    pub fn check_health(
        &self,
        file: &FileRecord,
        strict: bool,
        hooks: &mut dyn CheckHooks,
    ) -> Result<Verdict, ProbeError> {
        let started = self.clock.now();
        let deadline = started + self.config.timeout;
        let mut ticker = KeepaliveTicker::new(self.config.keepalive_interval, started);
        let mut scan = OutputScan::new(file.length_ms, &self.config.corruption_signals, &file.path);
        let mut session = self.runner.run(&file.path, strict)?;

        loop {
            let now = self.clock.now();
            if now >= deadline {
                session.kill();
                return Err(ProbeError::TimedOut {
                    path: file.path.clone(),
                    limit: self.config.timeout,
                });
            }
            if ticker.poll(now) {
                debug!("keepalive");
                if let Err(e) = hooks.keepalive() {
                    warn!("keepalive failed during probe of {}: {:#}", file.path.display(), e);
                }
            }
            let wait = ticker
                .remaining(now)
                .min(deadline.saturating_duration_since(now));

            match session.recv_timeout(wait)? {
                ProbeRecv::Event(ProbeEvent::Output(chunk)) => {
                    hooks.on_output(chunk.kind, &chunk.text);
                    if let Some(progress) = scan.observe(&chunk.text) {
                        hooks.on_progress(&progress);
                    }
                }
                ProbeRecv::Event(ProbeEvent::Exited(exit)) => {
                    return scan.verdict(exit, strict, &file.path);
                }
                ProbeRecv::Idle => {}
                ProbeRecv::Closed => {
                    return Err(ProbeError::Crashed {
                        path: file.path.clone(),
                    });
                }
            }
        }
    }
}

/// Accumulated facts about one run's output.
struct OutputScan<'a> {
    length_ms: Option<u64>,
    probed_length_ms: Option<u64>,
    signals: &'a [String],
    /// Lowercased input path; ffmpeg echoes it in headers and error prefixes.
    path_lowered: String,
    corruption_seen: bool,
    last_line: String,
}

impl<'a> OutputScan<'a> {
    fn new(length_ms: Option<u64>, signals: &'a [String], path: &Path) -> Self {
        Self {
            length_ms,
            probed_length_ms: None,
            signals,
            path_lowered: path.to_string_lossy().to_lowercase(),
            corruption_seen: false,
            last_line: String::new(),
        }
    }

    fn observe(&mut self, text: &str) -> Option<Progress> {
        if self.length_ms.is_none()
            && self.probed_length_ms.is_none()
            && let Some(len) = parse_duration_marker(text)
        {
            self.probed_length_ms = Some(len);
        }
        if text.contains("time=") {
            return parse_time_marker(text)
                .map(|ms| Progress::new(ms, self.length_ms.or(self.probed_length_ms)));
        }
        if let Some(lowered) = self.diagnostic_text(text)
            && self.signals.iter().any(|s| lowered.contains(s.as_str()))
        {
            debug!("corruption signal: {}", text);
            self.corruption_seen = true;
        }
        self.last_line = text.to_string();
        None
    }

    /// Lowercased diagnostic content of `text`, or None for header and metadata lines.
    ///
    /// Stream headers (`Input #0, ... from '<path>':`, `Output #0`) and the indented metadata,
    /// duration and stream lines below them describe the container, not decode errors. The input
    /// path is cut out so a directory or filename never reads as a signal.
    fn diagnostic_text(&self, text: &str) -> Option<String> {
        if text.starts_with(char::is_whitespace)
            || text.starts_with("Input #")
            || text.starts_with("Output #")
        {
            return None;
        }
        let lowered = text.to_lowercase();
        if self.path_lowered.is_empty() {
            return Some(lowered);
        }
        Some(lowered.replace(self.path_lowered.as_str(), ""))
    }

    fn verdict(self, exit: ExitInfo, strict: bool, path: &Path) -> Result<Verdict, ProbeError> {
        let length_ms = self.probed_length_ms;
        match exit.code {
            Some(0) if strict && self.corruption_seen => Ok(Verdict::inconsistent(length_ms)),
            Some(0) => Ok(Verdict::consistent(length_ms)),
            Some(_) if self.corruption_seen => Ok(Verdict::inconsistent(length_ms)),
            Some(code) => Err(ProbeError::AbnormalExit {
                path: path.to_path_buf(),
                code,
                tail: self.last_line,
            }),
            None => Err(ProbeError::Crashed {
                path: path.to_path_buf(),
            }),
        }
    }
}
