//! ffmpeg-backed [`ProbeRunner`]: decodes the whole file to the null muxer and streams its output.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::debug;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{ExitInfo, OutputChunk, OutputKind, ProbeConfig, ProbeEvent, ProbeRecv, ProbeRunner, ProbeSession};
use crate::error::ProbeError;
use crate::utils::config::ProbeConsts;

#[derive(Clone, Debug)]
pub struct FfmpegProbe {
    program: String,
    extra_args: Vec<String>,
}

impl FfmpegProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Full argument list for one run. Strict mode stops at the first decode error.
    pub fn args(&self, path: &Path, strict: bool) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-stats"]
            .into_iter()
            .map(String::from)
            .collect();
        if strict {
            args.push("-xerror".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("-i".to_string());
        args.push(path.to_string_lossy().into_owned());
        args.extend(["-f", "null", "-"].into_iter().map(String::from));
        args
    }
}

impl ProbeRunner for FfmpegProbe {
    fn run(&self, path: &Path, strict: bool) -> Result<Box<dyn ProbeSession>, ProbeError> {
        let args = self.args(path, strict);
        debug!("probe: {} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (tx, rx) = bounded::<OutputChunk>(ProbeConsts::OUTPUT_CHANNEL_CAP);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputKind::Stderr, tx.clone()));
        }
        // Dropping the last sender lets the session see both pipes close.
        drop(tx);

        Ok(Box::new(FfmpegSession {
            path: path.to_path_buf(),
            child,
            rx,
            readers,
            finished: false,
        }))
    }
}

struct FfmpegSession {
    path: PathBuf,
    child: Child,
    rx: Receiver<OutputChunk>,
    readers: Vec<JoinHandle<()>>,
    finished: bool,
}

impl FfmpegSession {
    /// Drain remaining output so no reader stays blocked on a full channel, then join them.
    fn join_readers(&mut self) {
        while self.rx.recv().is_ok() {}
        for h in self.readers.drain(..) {
            let _ = h.join();
        }
    }
}

impl ProbeSession for FfmpegSession {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<ProbeRecv, ProbeError> {
        if self.finished {
            return Ok(ProbeRecv::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(ProbeRecv::Event(ProbeEvent::Output(chunk))),
            Err(RecvTimeoutError::Timeout) => Ok(ProbeRecv::Idle),
            Err(RecvTimeoutError::Disconnected) => {
                self.join_readers();
                let status = self.child.wait()?;
                self.finished = true;
                debug!("probe exited on {}: {:?}", self.path.display(), status.code());
                Ok(ProbeRecv::Event(ProbeEvent::Exited(ExitInfo {
                    code: status.code(),
                })))
            }
        }
    }

    fn kill(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_readers();
        self.finished = true;
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Read a pipe to EOF, sending each `\n`/`\r`-terminated line as a chunk.
fn spawn_reader<R>(mut pipe: R, kind: OutputKind, tx: Sender<OutputChunk>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = vec![0u8; ProbeConsts::READ_CHUNK_SIZE];
        let mut line: Vec<u8> = Vec::new();
        loop {
            let n = match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for &b in &buf[..n] {
                if b == b'\n' || b == b'\r' {
                    if !emit(&mut line, kind, &tx) {
                        return;
                    }
                } else {
                    line.push(b);
                }
            }
        }
        emit(&mut line, kind, &tx);
    })
}

/// Send the buffered line (if non-blank) and clear it. False once the receiver is gone.
fn emit(line: &mut Vec<u8>, kind: OutputKind, tx: &Sender<OutputChunk>) -> bool {
    let text = String::from_utf8_lossy(line).trim().to_string();
    line.clear();
    if text.is_empty() {
        return true;
    }
    tx.send(OutputChunk { kind, text }).is_ok()
}
