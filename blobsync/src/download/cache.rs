//! Local pack cache.
//!
//! Fetched packs are kept compressed under a shared directory, sharded by
//! the first two characters of the pack hash, so later clones and branch
//! switches extract from disk instead of the network. Writers stage new
//! entries under a per-process staging name and rename on completion,
//! which keeps concurrent syncs against the same cache safe.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use super::error::PackError;
use super::extract::{extract_pack, INCOMING_SUFFIX};
use super::plan::IncomingPack;
use super::progress::CancelToken;

/// On-disk pack cache shared between working trees.
pub struct PackCache {
    root: PathBuf,
    /// Distinguishes this process's staging files from everyone else's.
    instance: String,
    writer_seq: AtomicU64,
}

impl PackCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        PackCache {
            root: root.into(),
            instance: format!("{}-{}", process::id(), nanos),
            writer_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash.get(..2).unwrap_or(hash)).join(hash)
    }

    /// Try to produce the pack's files from a cached entry.
    ///
    /// Returns `Ok(false)` on a miss. A miss includes entries that cannot
    /// be opened (another process may be writing or pruning) and entries
    /// whose bytes fail to stream, which are deleted so the next attempt
    /// goes straight to the network.
    ///
    /// # Errors
    ///
    /// Output write failures and cancellation surface to the caller; they
    /// say nothing about the health of the entry.
    pub fn try_extract(&self, pack: &IncomingPack, cancel: &CancelToken) -> Result<bool, PackError> {
        let entry = self.entry_path(&pack.hash);
        let file = match File::open(&entry) {
            Ok(file) => file,
            Err(_) => return Ok(false),
        };

        let mut decoder = GzDecoder::new(file);
        match extract_pack(&mut decoder, &pack.files, cancel) {
            Ok(()) => {
                debug!(pack = %pack.hash, "extracted from cache");
                Ok(true)
            }
            Err(PackError::Corrupt(reason)) => {
                warn!(pack = %pack.hash, %reason, "evicting bad cache entry");
                let _ = fs::remove_file(&entry);
                Ok(false)
            }
            Err(PackError::Network(reason)) => {
                warn!(pack = %pack.hash, %reason, "evicting unreadable cache entry");
                let _ = fs::remove_file(&entry);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Open a staging file for writing a new entry.
    ///
    /// Returns `None` when the cache directory cannot be used; downloads
    /// proceed without the fork in that case.
    pub fn begin_write(&self, hash: &str) -> Option<CacheWriter> {
        let entry = self.entry_path(hash);
        let parent = entry.parent()?;
        if let Err(e) = fs::create_dir_all(parent) {
            debug!(error = %e, path = %parent.display(), "cache unavailable, skipping write-through");
            return None;
        }

        let seq = self.writer_seq.fetch_add(1, Ordering::SeqCst);
        let temp = parent.join(format!(
            "{}-{}-{}{}",
            hash, self.instance, seq, INCOMING_SUFFIX
        ));
        match File::create(&temp) {
            Ok(file) => Some(CacheWriter {
                file: Some(file),
                temp,
                entry,
            }),
            Err(e) => {
                debug!(error = %e, path = %temp.display(), "cache unavailable, skipping write-through");
                None
            }
        }
    }

    /// Delete staging files older than `max_age`.
    ///
    /// A crashed or killed process leaves its staging files behind; the age
    /// guard keeps the sweep from pulling a live writer's file out from
    /// under it.
    pub fn sweep_incomplete(&self, max_age: Duration) {
        let cutoff = match SystemTime::now().checked_sub(max_age) {
            Some(cutoff) => cutoff,
            None => return,
        };
        let shards = match fs::read_dir(&self.root) {
            Ok(shards) => shards,
            Err(_) => return,
        };
        for shard in shards.flatten() {
            let entries = match fs::read_dir(shard.path()) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                if !name.to_string_lossy().ends_with(INCOMING_SUFFIX) {
                    continue;
                }
                let stale = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false);
                if stale {
                    debug!(path = %path.display(), "removing abandoned cache staging file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

/// In-progress cache entry; deleted on drop unless committed.
pub struct CacheWriter {
    file: Option<File>,
    temp: PathBuf,
    entry: PathBuf,
}

impl CacheWriter {
    /// Publish the fully written entry. Best effort; a failed rename just
    /// means the next sync downloads again.
    pub(crate) fn commit(mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            if let Err(e) = fs::rename(&self.temp, &self.entry) {
                debug!(error = %e, path = %self.entry.display(), "could not publish cache entry");
                let _ = fs::remove_file(&self.temp);
            }
        }
    }
}

impl Write for CacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "cache writer closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            let _ = fs::remove_file(&self.temp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::plan::IncomingFile;
    use crate::hash::hash_bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn pack_for(out_dir: &Path, name: &str, payload: &[u8]) -> IncomingPack {
        IncomingPack {
            hash: hash_bytes(payload),
            url: String::new(),
            use_proxy: false,
            compressed_size: payload.len() as u64,
            files: vec![IncomingFile {
                path: out_dir.join(name),
                name: name.to_string(),
                hash: hash_bytes(payload),
                min_offset: 0,
                max_offset: payload.len() as u64,
            }],
        }
    }

    #[test]
    fn test_miss_when_entry_absent() {
        let cache_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());
        let pack = pack_for(out_dir.path(), "a.bin", b"payload");

        let hit = cache.try_extract(&pack, &CancelToken::new()).unwrap();
        assert!(!hit);
    }

    #[test]
    fn test_commit_then_extract() {
        let cache_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());
        let payload = b"cached payload".to_vec();
        let pack = pack_for(out_dir.path(), "a.bin", &payload);

        let mut writer = cache.begin_write(&pack.hash).unwrap();
        writer.write_all(&gzip(&payload)).unwrap();
        writer.commit();

        let hit = cache.try_extract(&pack, &CancelToken::new()).unwrap();
        assert!(hit);
        assert_eq!(fs::read(out_dir.path().join("a.bin")).unwrap(), payload);

        // Entry landed at the sharded location under its final name.
        let entry = cache_dir
            .path()
            .join(pack.hash.get(..2).unwrap())
            .join(&pack.hash);
        assert!(entry.is_file());
    }

    #[test]
    fn test_corrupt_entry_evicted() {
        let cache_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());
        let pack = pack_for(out_dir.path(), "a.bin", b"expected payload");

        let entry = cache.entry_path(&pack.hash);
        fs::create_dir_all(entry.parent().unwrap()).unwrap();
        fs::write(&entry, b"this is not gzip").unwrap();

        let hit = cache.try_extract(&pack, &CancelToken::new()).unwrap();
        assert!(!hit);
        assert!(!entry.exists(), "bad entry should have been deleted");
        assert!(!out_dir.path().join("a.bin").exists());
    }

    #[test]
    fn test_wrong_content_evicted() {
        let cache_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());
        let pack = pack_for(out_dir.path(), "a.bin", b"expected payload");

        // Valid gzip, wrong bytes inside.
        let entry = cache.entry_path(&pack.hash);
        fs::create_dir_all(entry.parent().unwrap()).unwrap();
        fs::write(&entry, gzip(b"something else entirely")).unwrap();

        let hit = cache.try_extract(&pack, &CancelToken::new()).unwrap();
        assert!(!hit);
        assert!(!entry.exists());
    }

    #[test]
    fn test_abandoned_writer_cleans_up() {
        let cache_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());

        {
            let mut writer = cache.begin_write("abcd1234").unwrap();
            writer.write_all(b"partial").unwrap();
        }

        let shard = cache_dir.path().join("ab");
        let leftovers: Vec<_> = fs::read_dir(&shard).unwrap().collect();
        assert!(leftovers.is_empty(), "staging file survived drop");
    }

    #[test]
    fn test_sweep_removes_only_stale_staging() {
        let cache_dir = TempDir::new().unwrap();
        let cache = PackCache::new(cache_dir.path());

        let shard = cache_dir.path().join("ab");
        fs::create_dir_all(&shard).unwrap();
        let stale = shard.join("abcd-999-0.incoming");
        let fresh = shard.join("abcd-999-1.incoming");
        let entry = shard.join("abcd1234");
        fs::write(&stale, b"x").unwrap();
        fs::write(&fresh, b"x").unwrap();
        fs::write(&entry, b"x").unwrap();
        filetime::set_file_mtime(&stale, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();

        cache.sweep_incomplete(Duration::from_secs(3600));

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(entry.exists(), "sweep must never touch finished entries");
    }
}
