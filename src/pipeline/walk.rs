//! Directory walk: streams candidate video paths to the registrar.

use crossbeam_channel::Sender;
use log::{debug, warn};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::engine::tools::{is_video_file, should_include_in_walk};

/// Shared inputs of one walk.
#[derive(Clone, Debug)]
pub struct WalkContext {
    pub root: PathBuf,
    pub db_canonical: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub extensions: Vec<String>,
    pub follow_links: bool,
}

/// One result from a directory walk: either a path to consider or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.into_path()),
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

#[derive(Clone, Debug, Default)]
pub struct WalkSummary {
    /// Video paths sent to the registrar.
    pub sent: usize,
    /// Unreadable entries; the walk continues past them.
    pub skipped: Vec<(PathBuf, String)>,
}

pub fn spawn_walk_thread(path_tx: Sender<PathBuf>, ctx: WalkContext) -> JoinHandle<WalkSummary> {
    thread::spawn(move || {
        let iter = walkdir::WalkDir::new(&ctx.root)
            .follow_links(ctx.follow_links)
            .into_iter()
            .map(to_outcome_walkdir);
        run_walk_loop(path_tx, &ctx, iter)
    })
}

/// Consume `iter`, send every included video file on `path_tx`, and record errors.
/// Drops `path_tx` when done so the registrar sees the channel close.
pub fn run_walk_loop<I>(path_tx: Sender<PathBuf>, ctx: &WalkContext, iter: I) -> WalkSummary
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut summary = WalkSummary::default();
    for outcome in iter {
        match outcome {
            WalkOutcome::Ok(path) => {
                if !path.is_file()
                    || !is_video_file(&path, &ctx.extensions)
                    || !should_include_in_walk(&path, &ctx.root, &ctx.db_canonical, &ctx.exclude)
                {
                    continue;
                }
                if path_tx.send(path).is_err() {
                    break;
                }
                summary.sent += 1;
            }
            WalkOutcome::Err { msg, path } => {
                let path = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                warn!("Skipping {}: {}", path.display(), msg);
                summary.skipped.push((path, msg));
            }
        }
    }
    debug!("walk done: {} video path(s)", summary.sent);
    drop(path_tx);
    summary
}
