//! Concurrent pack download.
//!
//! Packs queue up behind a pool of worker threads while the calling thread
//! monitors shared counters and reports progress:
//!
//! - Workers prefer the cache and fall back to a streaming fetch
//! - A failed pack goes back on the queue and is retried, by any worker
//! - A worker that exhausts its retry budget reports itself failing; when
//!   every worker is failing or out of work the run is declared stalled
//!   and the rest is cancelled
//!
//! Progress accounting survives retries because each attempt tracks its
//! own byte count and rolls it back on failure.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::PackCache;
use super::error::PackError;
use super::extract::{classify_read_error, extract_pack};
use super::http::HttpClient;
use super::plan::{IncomingPack, PackPlan};
use super::progress::{CancelToken, DownloadCounters, DownloadSnapshot};
use super::stream::{CountingReader, HashingReader, TeeReader};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal failure of a download run. Per-pack errors are retried
/// internally and only surface here once the whole pool gives up.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("downloads stalled: {reason}")]
    Stalled { reason: String },

    #[error("download cancelled")]
    Cancelled,
}

/// Worker pool that turns a [`PackPlan`] into files on disk.
pub struct PackDownloader {
    http: Arc<dyn HttpClient>,
    cache: Option<Arc<PackCache>>,
    workers: usize,
    max_retries: u32,
}

impl PackDownloader {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: Option<Arc<PackCache>>,
        workers: usize,
        max_retries: u32,
    ) -> Self {
        PackDownloader {
            http,
            cache,
            workers: workers.max(1),
            max_retries,
        }
    }

    /// Run the plan to completion, cancellation, or stall.
    ///
    /// `on_progress` is invoked on a fixed interval with a snapshot of the
    /// shared counters, and once more after the pool has wound down.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Cancelled`] when the token fires,
    /// [`DownloadError::Stalled`] when every worker is failing or idle
    /// while files remain.
    pub fn download(
        &self,
        plan: PackPlan,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(&DownloadSnapshot),
    ) -> Result<DownloadSnapshot, DownloadError> {
        let counters = Arc::new(DownloadCounters::new(plan.total_files, plan.total_compressed));
        if plan.total_files == 0 {
            return Ok(counters.snapshot());
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(plan.packs)));
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let worker = Worker {
                queue: Arc::clone(&queue),
                counters: Arc::clone(&counters),
                cancel: cancel.clone(),
                http: Arc::clone(&self.http),
                cache: self.cache.clone(),
                max_retries: self.max_retries,
            };
            handles.push(thread::spawn(move || worker.run()));
        }

        let outcome = loop {
            thread::sleep(POLL_INTERVAL);
            let snapshot = counters.snapshot();
            on_progress(&snapshot);

            if snapshot.files_done >= snapshot.files_total {
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Err(DownloadError::Cancelled);
            }
            if snapshot.failing_or_idle >= self.workers {
                cancel.cancel();
                let reason = counters
                    .last_error()
                    .unwrap_or_else(|| String::from("no progress reported"));
                break Err(DownloadError::Stalled { reason });
            }
        };

        for handle in handles {
            let _ = handle.join();
        }

        let snapshot = counters.snapshot();
        on_progress(&snapshot);
        outcome.map(|_| snapshot)
    }
}

struct Worker {
    queue: Arc<Mutex<VecDeque<IncomingPack>>>,
    counters: Arc<DownloadCounters>,
    cancel: CancelToken,
    http: Arc<dyn HttpClient>,
    cache: Option<Arc<PackCache>>,
    max_retries: u32,
}

impl Worker {
    fn run(self) {
        let mut retries: u32 = 0;
        let mut counted_failing = false;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.counters.files_done() >= self.counters.files_total() {
                break;
            }

            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                queue.pop_front()
            };
            let pack = match next {
                Some(pack) => pack,
                None => {
                    // Another worker holds the remaining packs; poll again.
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
            };

            match self.process(&pack) {
                Ok(()) => {
                    self.counters.add_files_done(pack.files.len());
                    if counted_failing {
                        self.counters.clear_failing();
                        counted_failing = false;
                    }
                    retries = 0;
                }
                Err(PackError::Cancelled) => break,
                Err(e) => {
                    warn!(url = %pack.url, error = %e, "pack attempt failed");
                    retries += 1;
                    let message = format!("Failed to download '{}': {}", pack.url, e);
                    {
                        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                        queue.push_back(pack);
                    }
                    if retries > self.max_retries && !counted_failing {
                        counted_failing = true;
                        self.counters.mark_failing(message);
                    }
                }
            }
        }

        // Idle workers count toward the stall threshold too, so a pool
        // that has drained cannot wait forever on a failing straggler.
        if !counted_failing {
            self.counters.mark_idle();
        }
    }

    /// One attempt at one pack: cache first, then the network.
    fn process(&self, pack: &IncomingPack) -> Result<(), PackError> {
        if let Some(cache) = &self.cache {
            if cache.try_extract(pack, &self.cancel)? {
                self.counters.note_cached(pack.compressed_size);
                return Ok(());
            }
        }

        let mut attempt_bytes = 0u64;
        let result = self.fetch_and_extract(pack, |read| {
            attempt_bytes += read;
            self.counters.add_bytes_read(read);
        });

        match result {
            Ok(()) => {
                self.counters.adjust_total(attempt_bytes, pack.compressed_size);
                Ok(())
            }
            Err(e) => {
                self.counters.roll_back_bytes(attempt_bytes);
                Err(e)
            }
        }
    }

    fn fetch_and_extract<F: FnMut(u64)>(
        &self,
        pack: &IncomingPack,
        on_read: F,
    ) -> Result<(), PackError> {
        debug!(url = %pack.url, "fetching pack");
        let body = self.http.get(&pack.url, pack.use_proxy)?;
        let counting = CountingReader::new(body, on_read);

        let writer = self.cache.as_ref().and_then(|c| c.begin_write(&pack.hash));
        match writer {
            Some(mut writer) => {
                // Fork the raw compressed bytes into the cache while
                // hashing the decompressed stream for the whole-pack check.
                let mut tee = TeeReader::new(counting, &mut writer);
                let digest = {
                    let mut hashing = HashingReader::new(GzDecoder::new(&mut tee));
                    extract_pack(&mut hashing, &pack.files, &self.cancel)?;
                    drain(&mut hashing)?;
                    hashing.finalize()
                };
                let forked = tee.sink_ok();
                drop(tee);

                if digest != pack.hash {
                    return Err(PackError::corrupt(format!(
                        "incorrect hash for pack: expected {}, got {}",
                        pack.hash, digest
                    )));
                }
                if forked {
                    writer.commit();
                }
                Ok(())
            }
            None => {
                let mut decoder = GzDecoder::new(counting);
                extract_pack(&mut decoder, &pack.files, &self.cancel)
            }
        }
    }
}

/// Pull a stream to EOF so the cache fork and digest cover the whole pack,
/// not just the ranges extraction needed.
fn drain<R: Read>(reader: &mut R) -> Result<(), PackError> {
    io::copy(reader, &mut io::sink())
        .map(|_| ())
        .map_err(classify_read_error)
}
