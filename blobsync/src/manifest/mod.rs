//! Manifest data model.
//!
//! Components of a repository publish manifest documents describing the
//! binary files they need: which files exist, which content blob each file
//! is made of, and which downloadable pack holds each blob. This module owns
//! the document types plus:
//!
//! - Discovery and merge of every document in a working tree (`index`)
//! - The tracking state left behind by previous runs (`working`)
//! - Crash-safe persistence for that tracking state (`store`)

mod index;
mod store;
mod working;

pub use index::{PackSource, TargetIndex, MANIFEST_DIR, MANIFEST_SUFFIX};
pub use store::{StateFile, STATE_FILE_NAME};
pub use working::{file_timestamp, WorkingFile, WorkingManifest, TIMESTAMP_PENDING};

use serde::{Deserialize, Serialize};

/// One manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyManifest {
    /// Base URL packs are served from.
    pub base_url: String,

    /// Route this manifest's packs around any configured proxy.
    #[serde(default)]
    pub ignore_proxy: bool,

    #[serde(default)]
    pub files: Vec<FileEntry>,

    #[serde(default)]
    pub blobs: Vec<BlobEntry>,

    #[serde(default)]
    pub packs: Vec<PackEntry>,
}

/// A file the working tree should contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the tree root, `/`-separated. Unique within the
    /// merged index, compared case-insensitively.
    pub name: String,

    /// Lowercase SHA-1 of the file content, which is also the hash of the
    /// blob the file is produced from.
    pub hash: String,

    /// Whether the file should carry the executable bit after sync.
    #[serde(default)]
    pub executable: bool,
}

/// A run of bytes inside a pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobEntry {
    /// SHA-1 of the blob bytes.
    pub hash: String,

    /// Pack holding this blob.
    pub pack_hash: String,

    /// Offset within the decompressed pack.
    pub pack_offset: u64,

    /// Decompressed size in bytes.
    pub size: u64,
}

/// A downloadable, gzip-compressed bundle of blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackEntry {
    /// SHA-1 of the entire decompressed pack.
    pub hash: String,

    /// URL path segment between the base URL and the hash.
    pub remote_path: String,

    /// Size of the compressed payload as served.
    pub compressed_size: u64,

    /// Decompressed size in bytes.
    pub size: u64,
}
