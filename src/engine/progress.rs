//! Progress bars for scanning and verification (verbose CLI only).

use kdam::{Animation, Bar, BarExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " files"
    )))
}

/// Force a refresh of the bar (e.g. so counter shows "0 files" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Update progress bar if the lock is free; skipped updates are caught up by later ones.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Counts items and updates the bar every `chunk_size` of them.
pub struct BatchedProgress {
    bar: ProgressBar,
    pending: AtomicUsize,
    chunk_size: usize,
}

impl BatchedProgress {
    pub fn new(bar: ProgressBar, chunk_size: usize) -> Self {
        Self {
            bar,
            pending: AtomicUsize::new(0),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn tick(&self, n: usize) {
        let before = self.pending.fetch_add(n, Ordering::Relaxed);
        if (before + n) >= self.chunk_size
            && self
                .pending
                .compare_exchange(before + n, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            update_progress_bar(&self.bar, before + n);
        }
    }

    /// Push the remainder to the bar and redraw it.
    pub fn flush(&self) {
        let rest = self.pending.swap(0, Ordering::AcqRel);
        if rest > 0 {
            if let Ok(mut bar) = self.bar.lock() {
                let _ = bar.update(rest);
            }
        }
        refresh_bar(&self.bar);
    }
}

