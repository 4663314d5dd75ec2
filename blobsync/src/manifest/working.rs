//! Working-tree tracking state.
//!
//! A [`WorkingManifest`] records what the last sync did so the next run can
//! be incremental: for every managed file, the content hash it had, the hash
//! it was supposed to have, and the file's mtime when the hash was taken.
//! A later run only re-hashes a file when its mtime no longer matches.

use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Timestamp value marking an entry whose download never completed.
pub const TIMESTAMP_PENDING: u64 = 0;

/// Tracking record for one managed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingFile {
    /// Path relative to the tree root, `/`-separated.
    pub name: String,

    /// Hash of the content actually on disk; `None` while a download is in
    /// flight.
    #[serde(default)]
    pub hash: Option<String>,

    /// Hash the file was supposed to have when last synced; `None` for
    /// files adopted from disk without ever having been downloaded.
    #[serde(default)]
    pub expected_hash: Option<String>,

    /// File mtime in nanoseconds since the Unix epoch at the moment `hash`
    /// was recorded. [`TIMESTAMP_PENDING`] means the download is incomplete.
    #[serde(default)]
    pub timestamp: u64,
}

impl WorkingFile {
    /// Entry for a file that is about to be downloaded.
    pub fn pending(name: impl Into<String>, expected_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: None,
            expected_hash: Some(expected_hash.into()),
            timestamp: TIMESTAMP_PENDING,
        }
    }

    /// Whether the recorded content still matches what the last sync
    /// intended. Entries without both hashes never match.
    pub fn matches_expected(&self) -> bool {
        match (&self.hash, &self.expected_hash) {
            (Some(actual), Some(expected)) => actual == expected,
            _ => false,
        }
    }

    /// Whether the entry marks an interrupted download.
    pub fn is_pending(&self) -> bool {
        self.timestamp == TIMESTAMP_PENDING
    }
}

/// Every tracking record for a working tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingManifest {
    #[serde(default)]
    pub files: Vec<WorkingFile>,
}

/// File mtime as nanoseconds since the Unix epoch.
///
/// Clamped to at least 1 so a real mtime can never collide with
/// [`TIMESTAMP_PENDING`].
pub fn file_timestamp(path: &Path) -> io::Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(u64::try_from(nanos).unwrap_or(u64::MAX).max(1))
}
