//! Working-tree diff.
//!
//! Compares what is on disk (as tracked by the working manifest) against
//! the merged target index and produces a [`SyncPlan`]: files to download,
//! files to delete, and files the user has modified. Hashing is lazy; a
//! tracked file is only re-hashed when its mtime no longer matches the
//! recorded one.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::config::FolderFilter;
use crate::error::{SyncError, SyncResult};
use crate::hash::hash_file;
use crate::manifest::{file_timestamp, TargetIndex, WorkingFile, WorkingManifest};

use super::SyncPlan;

pub(crate) fn compute(
    root: &Path,
    previous: WorkingManifest,
    index: TargetIndex,
    filter: &FolderFilter,
) -> SyncResult<SyncPlan> {
    // Refresh the tracked files that still exist, re-hashing the ones whose
    // mtime moved since the last run.
    let mut current: HashMap<String, WorkingFile> = HashMap::new();
    for mut entry in previous.files {
        let path = root.join(&entry.name);
        if !path.is_file() {
            continue;
        }
        let timestamp = file_timestamp(&path).map_err(|e| SyncError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        if timestamp != entry.timestamp {
            entry.hash = Some(hash_file(&path)?);
            entry.timestamp = timestamp;
        }
        current.insert(entry.name.to_lowercase(), entry);
    }

    // Adopt target files that exist on disk without ever having been
    // tracked. They carry no expected hash; if they do not match their
    // target they count as modified rather than silently disposable.
    for target in index.files() {
        let key = target.name.to_lowercase();
        if current.contains_key(&key) {
            continue;
        }
        let path = root.join(&target.name);
        if !path.is_file() {
            continue;
        }
        debug!(name = %target.name, "adopting untracked file");
        let timestamp = file_timestamp(&path).map_err(|e| SyncError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        current.insert(
            key,
            WorkingFile {
                name: target.name.clone(),
                hash: Some(hash_file(&path)?),
                expected_hash: None,
                timestamp,
            },
        );
    }

    let present_before: HashSet<String> = current.keys().cloned().collect();

    // Claim every target we already satisfy; queue the rest for download.
    // Claimed entries leave `current`, so whatever remains afterwards is
    // either obsolete or modified.
    let mut working = WorkingManifest::default();
    let mut to_download = Vec::new();
    for target in index.files() {
        if filter.is_excluded(&target.name) {
            continue;
        }
        let key = target.name.to_lowercase();
        let satisfied = current
            .get(&key)
            .map(|entry| {
                entry
                    .hash
                    .as_deref()
                    .map(|hash| hash.eq_ignore_ascii_case(&target.hash))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if satisfied {
            if let Some(mut entry) = current.remove(&key) {
                entry.expected_hash = Some(target.hash.clone());
                working.files.push(entry);
            }
        } else {
            working
                .files
                .push(WorkingFile::pending(target.name.clone(), target.hash.clone()));
            to_download.push(target.clone());
        }
    }

    // Bucket the leftovers. A file the manifests still publish but the
    // filter excludes is only forgotten, never deleted.
    let mut to_remove = Vec::new();
    let mut tampered = Vec::new();
    let mut tampered_entries = Vec::new();
    for (_, entry) in current {
        if index.contains_file(&entry.name) && filter.is_excluded(&entry.name) {
            debug!(name = %entry.name, "dropping excluded file from tracking");
            continue;
        }
        if entry.matches_expected() {
            to_remove.push(entry.name);
        } else {
            tampered.push(entry.name.clone());
            tampered_entries.push(entry);
        }
    }

    // Index iteration order is arbitrary; sort so plans, reports, and the
    // persisted manifest come out stable.
    working.files.sort_by(|a, b| a.name.cmp(&b.name));
    to_download.sort_by(|a, b| a.name.cmp(&b.name));
    tampered_entries.sort_by(|a, b| a.name.cmp(&b.name));
    to_remove.sort();
    tampered.sort();

    Ok(SyncPlan {
        to_download,
        to_remove,
        tampered,
        tampered_entries,
        present_before,
        resolution: None,
        working,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependencyManifest, FileEntry};
    use std::fs;
    use tempfile::TempDir;

    fn index_of(files: Vec<FileEntry>) -> TargetIndex {
        let mut index = TargetIndex::default();
        index.merge(DependencyManifest {
            base_url: "https://cdn.example.com".to_string(),
            ignore_proxy: false,
            files,
            blobs: vec![],
            packs: vec![],
        });
        index
    }

    fn target(name: &str, hash: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            hash: hash.to_string(),
            executable: false,
        }
    }

    fn tracked(root: &Path, name: &str, content: &[u8]) -> WorkingFile {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        WorkingFile {
            name: name.to_string(),
            hash: Some(crate::hash::hash_bytes(content)),
            expected_hash: Some(crate::hash::hash_bytes(content)),
            timestamp: file_timestamp(&path).unwrap(),
        }
    }

    #[test]
    fn test_fresh_tree_downloads_everything() {
        let temp = TempDir::new().unwrap();
        let index = index_of(vec![target("a/one.bin", "h1"), target("b/two.bin", "h2")]);

        let plan = compute(
            temp.path(),
            WorkingManifest::default(),
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert_eq!(plan.download_count(), 2);
        assert_eq!(plan.to_download[0].name, "a/one.bin");
        assert!(plan.to_remove.is_empty());
        assert!(plan.tampered.is_empty());
        // Entries are staged as pending until the download finishes.
        assert!(plan.working.files.iter().all(|f| f.is_pending()));
    }

    #[test]
    fn test_unchanged_tree_is_noop() {
        let temp = TempDir::new().unwrap();
        let content = b"stable content";
        let entry = tracked(temp.path(), "a/one.bin", content);
        let index = index_of(vec![target("a/one.bin", &crate::hash::hash_bytes(content))]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert!(plan.is_noop());
        assert_eq!(plan.working.files.len(), 1);
        assert!(!plan.working.files[0].is_pending());
    }

    #[test]
    fn test_unmatched_mtime_triggers_rehash() {
        let temp = TempDir::new().unwrap();
        let content = b"current content";
        let mut entry = tracked(temp.path(), "one.bin", content);
        // Stale record: wrong hash, wrong timestamp. The re-hash must
        // discover the file actually matches its target.
        entry.hash = Some("f".repeat(40));
        entry.timestamp = 12345;
        let index = index_of(vec![target("one.bin", &crate::hash::hash_bytes(content))]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert!(plan.is_noop(), "re-hash should have claimed the file");
    }

    #[test]
    fn test_matching_mtime_trusts_recorded_hash() {
        let temp = TempDir::new().unwrap();
        let content = b"on disk";
        let wanted = "a".repeat(40);
        let mut entry = tracked(temp.path(), "one.bin", content);
        // The recorded hash says we match the target even though the bytes
        // do not. With an untouched mtime the record wins; this is what
        // makes repeated syncs cheap.
        entry.hash = Some(wanted.clone());
        entry.expected_hash = Some(wanted.clone());
        let index = index_of(vec![target("one.bin", &wanted)]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert!(plan.is_noop());
    }

    #[test]
    fn test_adopts_matching_untracked_file() {
        let temp = TempDir::new().unwrap();
        let content = b"already here";
        fs::write(temp.path().join("one.bin"), content).unwrap();
        let index = index_of(vec![target("one.bin", &crate::hash::hash_bytes(content))]);

        let plan = compute(
            temp.path(),
            WorkingManifest::default(),
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert!(plan.is_noop(), "matching on-disk file needs no download");
        // Adopted and claimed, so it is tracked like a synced file from now on.
        assert_eq!(plan.working.files.len(), 1);
        assert_eq!(plan.working.files[0].hash, plan.working.files[0].expected_hash);
    }

    #[test]
    fn test_mismatched_untracked_file_is_tampered() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one.bin"), b"user's own bytes").unwrap();
        let index = index_of(vec![target("one.bin", &"b".repeat(40))]);

        let plan = compute(
            temp.path(),
            WorkingManifest::default(),
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert_eq!(plan.tampered, vec!["one.bin".to_string()]);
        assert_eq!(plan.download_count(), 1);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_modified_tracked_file_is_tampered() {
        let temp = TempDir::new().unwrap();
        let mut entry = tracked(temp.path(), "one.bin", b"synced content");
        // Tracking says we expected something else entirely.
        entry.expected_hash = Some("c".repeat(40));
        let index = index_of(vec![target("one.bin", &"c".repeat(40))]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert_eq!(plan.tampered, vec!["one.bin".to_string()]);
        assert_eq!(plan.download_count(), 1);
    }

    #[test]
    fn test_obsolete_clean_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let entry = tracked(temp.path(), "old/gone.bin", b"obsolete");
        let index = index_of(vec![]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert_eq!(plan.to_remove, vec!["old/gone.bin".to_string()]);
        assert!(plan.tampered.is_empty());
        assert!(plan.working.files.is_empty());
    }

    #[test]
    fn test_excluded_target_dropped_without_removal() {
        let temp = TempDir::new().unwrap();
        let content = b"platform specific";
        let entry = tracked(temp.path(), "bin/Mac/tool", content);
        let index = index_of(vec![target("bin/Mac/tool", &crate::hash::hash_bytes(content))]);
        let filter = FolderFilter::new(&["Mac".to_string()], &[]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &filter,
        )
        .unwrap();

        // Not deleted, not downloaded, not tracked any more.
        assert!(plan.is_noop());
        assert!(plan.working.files.is_empty());
        assert!(temp.path().join("bin/Mac/tool").exists());
    }

    #[test]
    fn test_missing_tracked_file_redownloaded() {
        let temp = TempDir::new().unwrap();
        let wanted = "d".repeat(40);
        // Tracked but deleted from disk behind our back.
        let entry = WorkingFile {
            name: "one.bin".to_string(),
            hash: Some(wanted.clone()),
            expected_hash: Some(wanted.clone()),
            timestamp: 999,
        };
        let index = index_of(vec![target("one.bin", &wanted)]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert_eq!(plan.download_count(), 1);
        assert!(plan.tampered.is_empty());
    }

    #[test]
    fn test_case_differences_still_claim() {
        let temp = TempDir::new().unwrap();
        let content = b"cased";
        let mut entry = tracked(temp.path(), "Dir/File.bin", content);
        entry.hash = Some(crate::hash::hash_bytes(content).to_uppercase());
        let index = index_of(vec![target("dir/file.bin", &crate::hash::hash_bytes(content))]);

        let plan = compute(
            temp.path(),
            WorkingManifest {
                files: vec![entry],
            },
            index,
            &FolderFilter::default(),
        )
        .unwrap();

        assert!(plan.is_noop());
    }
}
