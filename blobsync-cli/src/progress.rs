//! Single-line download status.
//!
//! Renders snapshots from the download layer as one spinner line on
//! stderr, in the shape:
//!
//! ```text
//! Updating dependencies:  37% (10/27), 41.2/110.5 MiB | 3.52 MiB/s, 12.0 MiB cached...
//! ```
//!
//! The transfer rate is computed over a sliding window of recent
//! snapshots rather than since the start, so it recovers quickly after a
//! stall.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use blobsync::DownloadSnapshot;
use indicatif::{ProgressBar, ProgressStyle};

/// Snapshots arrive every 100ms; 60 of them give a six second window.
const RATE_WINDOW: usize = 60;

pub struct StatusLine {
    bar: ProgressBar,
    samples: VecDeque<(Instant, u64)>,
}

impl StatusLine {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        Self {
            bar,
            samples: VecDeque::with_capacity(RATE_WINDOW),
        }
    }

    pub fn update(&mut self, snapshot: &DownloadSnapshot) {
        if self.samples.is_empty() {
            // Runs with nothing to download never show the spinner.
            self.bar.enable_steady_tick(Duration::from_millis(100));
        }
        if self.samples.len() == RATE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((Instant::now(), snapshot.bytes_read));

        let rate = match (self.samples.front(), self.samples.back()) {
            (Some((t0, b0)), Some((t1, b1))) if t1 > t0 => {
                // Failed attempts roll their bytes back, so the window can
                // shrink; clamp instead of going negative.
                b1.saturating_sub(*b0) as f64 / (*t1 - *t0).as_secs_f64()
            }
            _ => 0.0,
        };

        self.bar.set_message(status_message(snapshot, rate));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

fn status_message(snapshot: &DownloadSnapshot, rate: f64) -> String {
    let mut message = format!(
        "Updating dependencies: {:3}% ({}/{})",
        snapshot.percent(),
        snapshot.files_done,
        snapshot.files_total
    );
    if snapshot.bytes_total > 0 {
        message.push_str(&format!(
            ", {:.1}/{:.1} MiB | {:.2} MiB/s",
            mib(snapshot.bytes_read),
            mib(snapshot.bytes_total),
            rate / (1024.0 * 1024.0)
        ));
    }
    if snapshot.bytes_cached > 0 {
        message.push_str(&format!(", {:.1} MiB cached", mib(snapshot.bytes_cached)));
    }
    if snapshot.files_done == snapshot.files_total {
        message.push_str(", done.");
    } else {
        message.push_str("...");
    }
    message
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(done: usize, total: usize, read: u64, bytes_total: u64, cached: u64) -> DownloadSnapshot {
        DownloadSnapshot {
            files_total: total,
            files_done: done,
            bytes_read: read,
            bytes_total,
            bytes_cached: cached,
            failing_or_idle: 0,
        }
    }

    #[test]
    fn test_status_without_byte_totals() {
        let msg = status_message(&snapshot(1, 4, 0, 0, 0), 0.0);
        assert_eq!(msg, "Updating dependencies: 100% (1/4)...");
    }

    #[test]
    fn test_status_with_rate_and_cache() {
        let mb: u64 = 1024 * 1024;
        let msg = status_message(&snapshot(10, 27, 41 * mb, 110 * mb, 12 * mb), 2.0 * mb as f64);
        assert_eq!(
            msg,
            "Updating dependencies:  43% (10/27), 41.0/110.0 MiB | 2.00 MiB/s, 12.0 MiB cached..."
        );
    }

    #[test]
    fn test_status_done() {
        let msg = status_message(&snapshot(4, 4, 100, 100, 0), 0.0);
        assert!(msg.ends_with(", done."), "got {:?}", msg);
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }
}
