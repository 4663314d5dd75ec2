//! Shared download progress state.
//!
//! One [`DownloadCounters`] instance is shared by every worker thread and
//! the monitor loop. Workers bump the counters as bytes arrive and roll
//! them back when an attempt fails; the monitor samples them through
//! [`DownloadCounters::snapshot`] on a fixed interval. All atomics use
//! `SeqCst`; the contention is negligible next to the I/O around it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cooperative cancellation flag.
///
/// Workers check it between queue polls and between stream blocks, so a
/// cancelled run unwinds at the next boundary with every temp file cleaned
/// up rather than being torn down mid-write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Live counters shared between the workers and the monitor.
pub struct DownloadCounters {
    files_total: usize,
    bytes_read: AtomicU64,
    bytes_total: AtomicU64,
    bytes_cached: AtomicU64,
    files_done: AtomicUsize,
    failing_or_idle: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl DownloadCounters {
    /// Start counters for a plan of `files_total` files whose packs declare
    /// `bytes_total` compressed bytes.
    pub fn new(files_total: usize, bytes_total: u64) -> Self {
        Self {
            files_total,
            bytes_read: AtomicU64::new(0),
            bytes_total: AtomicU64::new(bytes_total),
            bytes_cached: AtomicU64::new(0),
            files_done: AtomicUsize::new(0),
            failing_or_idle: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn files_total(&self) -> usize {
        self.files_total
    }

    pub fn files_done(&self) -> usize {
        self.files_done.load(Ordering::SeqCst)
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Undo the byte count of a failed attempt so progress never overstates.
    pub fn roll_back_bytes(&self, bytes: u64) {
        self.bytes_read.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Replace a pack's declared size with what the transfer actually read.
    pub fn adjust_total(&self, actual: u64, declared: u64) {
        if actual >= declared {
            self.bytes_total.fetch_add(actual - declared, Ordering::SeqCst);
        } else {
            self.bytes_total.fetch_sub(declared - actual, Ordering::SeqCst);
        }
    }

    /// Move a cache-served pack's declared size out of the transfer total.
    pub fn note_cached(&self, declared: u64) {
        self.bytes_cached.fetch_add(declared, Ordering::SeqCst);
        self.bytes_total.fetch_sub(declared, Ordering::SeqCst);
    }

    pub fn add_files_done(&self, count: usize) {
        self.files_done.fetch_add(count, Ordering::SeqCst);
    }

    /// A worker crossed its retry budget; remember why.
    pub fn mark_failing(&self, error: String) {
        self.failing_or_idle.fetch_add(1, Ordering::SeqCst);
        *self.lock_last_error() = Some(error);
    }

    /// A previously failing worker recovered.
    pub fn clear_failing(&self) {
        self.failing_or_idle.fetch_sub(1, Ordering::SeqCst);
    }

    /// A worker ran out of work and exited cleanly.
    pub fn mark_idle(&self) {
        self.failing_or_idle.fetch_add(1, Ordering::SeqCst);
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_last_error().clone()
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            files_total: self.files_total,
            files_done: self.files_done.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            bytes_total: self.bytes_total.load(Ordering::SeqCst),
            bytes_cached: self.bytes_cached.load(Ordering::SeqCst),
            failing_or_idle: self.failing_or_idle.load(Ordering::SeqCst),
        }
    }

    fn lock_last_error(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSnapshot {
    pub files_total: usize,
    pub files_done: usize,
    pub bytes_read: u64,
    pub bytes_total: u64,
    pub bytes_cached: u64,
    pub failing_or_idle: usize,
}

impl DownloadSnapshot {
    /// Completion percentage by volume, counting cache-served bytes as done.
    pub fn percent(&self) -> u64 {
        let done = self.bytes_read + self.bytes_cached;
        let total = self.bytes_total + self.bytes_cached;
        if total == 0 {
            return 100;
        }
        done * 100 / total
    }
}
