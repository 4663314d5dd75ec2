//! Pack planning.
//!
//! Turns the diff's download list into per-pack work orders: files group by
//! the blob that produces them, blobs group by the pack that holds them,
//! and each needed pack becomes one [`IncomingPack`] fetched exactly once.
//! A blob shared by several files yields several [`IncomingFile`] entries
//! with identical offset ranges inside the same pack.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};
use crate::manifest::{BlobEntry, FileEntry, TargetIndex};

/// One output file produced from a pack.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Absolute output path.
    pub path: PathBuf,

    /// Tree-relative name, for messages.
    pub name: String,

    /// Expected lowercase SHA-1 of the produced file.
    pub hash: String,

    /// First byte of the file's range in the decompressed pack.
    pub min_offset: u64,

    /// One past the last byte of the range.
    pub max_offset: u64,
}

/// One pack to fetch and the files to split out of it.
#[derive(Debug, Clone)]
pub struct IncomingPack {
    /// Lowercase pack hash; also the cache key.
    pub hash: String,

    pub url: String,

    /// Route through the configured proxy, if any.
    pub use_proxy: bool,

    /// Compressed size the manifest declared.
    pub compressed_size: u64,

    /// Files to produce, ascending by `min_offset`.
    pub files: Vec<IncomingFile>,
}

/// Work orders plus the totals progress accounting starts from.
#[derive(Debug, Default)]
pub struct PackPlan {
    pub packs: Vec<IncomingPack>,
    pub total_files: usize,
    pub total_compressed: u64,
}

struct NeededBlob<'a> {
    blob: BlobEntry,
    files: Vec<&'a FileEntry>,
}

/// Build the pack plan for a download list.
///
/// # Errors
///
/// [`SyncError::MissingBlob`] when a file's content hash is not defined by
/// any merged manifest, [`SyncError::MissingPack`] when a blob points at an
/// undefined pack.
pub fn plan_packs(
    root: &Path,
    downloads: &[FileEntry],
    index: &TargetIndex,
) -> SyncResult<PackPlan> {
    // Files keyed by the blob that produces them.
    let mut needed: HashMap<String, NeededBlob<'_>> = HashMap::new();
    for file in downloads {
        let blob = index
            .blob(&file.hash)
            .ok_or_else(|| SyncError::MissingBlob {
                hash: file.hash.clone(),
                file: file.name.clone(),
            })?
            .clone();
        needed
            .entry(blob.hash.to_lowercase())
            .or_insert_with(|| NeededBlob {
                blob,
                files: Vec::new(),
            })
            .files
            .push(file);
    }

    // Blobs keyed by the pack that holds them.
    let mut by_pack: HashMap<String, Vec<NeededBlob<'_>>> = HashMap::new();
    for (_, entry) in needed {
        by_pack
            .entry(entry.blob.pack_hash.to_lowercase())
            .or_default()
            .push(entry);
    }

    let mut plan = PackPlan::default();
    for (pack_hash, blobs) in by_pack {
        let source = index.pack(&pack_hash).ok_or_else(|| SyncError::MissingPack {
            hash: pack_hash.clone(),
            blob: blobs
                .first()
                .map(|b| b.blob.hash.clone())
                .unwrap_or_default(),
        })?;

        let mut files = Vec::new();
        for entry in &blobs {
            for file in &entry.files {
                files.push(IncomingFile {
                    path: root.join(&file.name),
                    name: file.name.clone(),
                    hash: file.hash.to_lowercase(),
                    min_offset: entry.blob.pack_offset,
                    max_offset: entry.blob.pack_offset + entry.blob.size,
                });
            }
        }
        files.sort_by(|a, b| {
            (a.min_offset, a.max_offset, &a.name).cmp(&(b.min_offset, b.max_offset, &b.name))
        });

        plan.total_files += files.len();
        plan.total_compressed += source.pack.compressed_size;
        plan.packs.push(IncomingPack {
            hash: pack_hash,
            url: source.url(),
            use_proxy: !source.ignore_proxy,
            compressed_size: source.pack.compressed_size,
            files,
        });
    }

    // Queue order does not matter for correctness; keep it stable anyway.
    plan.packs.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(plan)
}
