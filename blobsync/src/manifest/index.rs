//! Manifest discovery and merge.
//!
//! Manifests live at `<root>/<component>/deps/*.blobsync.json`. Every
//! discovered document is merged into a single [`TargetIndex`]; when two
//! documents define the same file, blob, or pack, the later one in scan
//! order wins. Keys are compared case-insensitively.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SyncError, SyncResult};

use super::{BlobEntry, DependencyManifest, FileEntry, PackEntry};

/// Subdirectory of each top-level folder that holds manifest documents.
pub const MANIFEST_DIR: &str = "deps";

/// Required manifest document suffix.
pub const MANIFEST_SUFFIX: &str = ".blobsync.json";

/// A pack together with the download settings of the manifest that declared
/// it.
#[derive(Debug, Clone)]
pub struct PackSource {
    pub pack: PackEntry,
    pub base_url: String,
    pub ignore_proxy: bool,
}

impl PackSource {
    /// Full URL the pack is served from.
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.pack.remote_path,
            self.pack.hash
        )
    }
}

/// Merged view of every discovered manifest document.
#[derive(Debug, Default)]
pub struct TargetIndex {
    files: HashMap<String, FileEntry>,
    blobs: HashMap<String, BlobEntry>,
    packs: HashMap<String, PackSource>,
}

impl TargetIndex {
    /// Discover and merge every manifest under `root`.
    ///
    /// Scans the immediate child directories (dotted names skipped) for a
    /// `deps/` subdirectory and collects `*.blobsync.json` documents from
    /// it. Documents merge in sorted path order, so the merge is
    /// deterministic.
    ///
    /// # Errors
    ///
    /// Directory enumeration failures surface as
    /// [`SyncError::ReadFailed`]; a document that does not parse is fatal
    /// ([`SyncError::ManifestParse`]).
    pub fn scan(root: &Path) -> SyncResult<Self> {
        let mut documents = Vec::new();
        for child in read_dir_entries(root)? {
            if file_name_of(&child).starts_with('.') {
                continue;
            }
            let deps_dir = child.join(MANIFEST_DIR);
            if !deps_dir.is_dir() {
                continue;
            }
            for doc in read_dir_entries(&deps_dir)? {
                let name = file_name_of(&doc);
                if name.starts_with('.') || !name.ends_with(MANIFEST_SUFFIX) {
                    continue;
                }
                documents.push(doc);
            }
        }
        documents.sort();

        let mut index = TargetIndex::default();
        for path in &documents {
            debug!(path = %path.display(), "merging manifest");
            index.merge(load_document(path)?);
        }
        Ok(index)
    }

    /// Merge one parsed document; its entries win any key collision.
    pub fn merge(&mut self, manifest: DependencyManifest) {
        for pack in manifest.packs {
            self.packs.insert(
                pack.hash.to_lowercase(),
                PackSource {
                    base_url: manifest.base_url.clone(),
                    ignore_proxy: manifest.ignore_proxy,
                    pack,
                },
            );
        }
        for blob in manifest.blobs {
            self.blobs.insert(blob.hash.to_lowercase(), blob);
        }
        for file in manifest.files {
            self.files.insert(file.name.to_lowercase(), file);
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.get(&name.to_lowercase())
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.files.contains_key(&name.to_lowercase())
    }

    pub fn blob(&self, hash: &str) -> Option<&BlobEntry> {
        self.blobs.get(&hash.to_lowercase())
    }

    pub fn pack(&self, hash: &str) -> Option<&PackSource> {
        self.packs.get(&hash.to_lowercase())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn read_dir_entries(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let reader = fs::read_dir(dir).map_err(|e| SyncError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut paths = Vec::new();
    for entry in reader {
        let entry = entry.map_err(|e| SyncError::ReadFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_document(path: &Path) -> SyncResult<DependencyManifest> {
    let raw = fs::read(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&raw).map_err(|e| SyncError::ManifestParse {
        path: path.to_path_buf(),
        source: e,
    })
}
