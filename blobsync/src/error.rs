//! Top-level error types for the sync library.
//!
//! Errors carry enough context (paths, hashes, sources) to be printed
//! directly to the user by the CLI. Per-attempt download errors live in
//! [`crate::download::PackError`]; everything that ends a run is here.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that can end a sync run.
#[derive(Debug)]
pub enum SyncError {
    /// Failed to read a file or directory.
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to delete a file.
    RemoveFailed { path: PathBuf, source: io::Error },

    /// Failed to move a file into place.
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// A manifest document could not be parsed.
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A manifest references a blob that no merged manifest defines.
    MissingBlob { hash: String, file: String },

    /// A blob references a pack that no merged manifest defines.
    MissingPack { hash: String, blob: String },

    /// Locally modified files block the sync under the current overwrite
    /// policy.
    TamperedFiles { names: Vec<String> },

    /// The download phase gave up after every worker stalled out.
    DownloadFailed { reason: String },

    /// The run was cancelled before it completed.
    Interrupted,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::ReadFailed { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            SyncError::WriteFailed { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
            SyncError::RemoveFailed { path, source } => {
                write!(f, "Failed to delete {}: {}", path.display(), source)
            }
            SyncError::RenameFailed { from, to, source } => {
                write!(
                    f,
                    "Failed to move {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            SyncError::ManifestParse { path, source } => {
                write!(f, "Failed to parse {}: {}", path.display(), source)
            }
            SyncError::MissingBlob { hash, file } => {
                write!(f, "No manifest defines blob {} needed by {}", hash, file)
            }
            SyncError::MissingPack { hash, blob } => {
                write!(f, "No manifest defines pack {} holding blob {}", hash, blob)
            }
            SyncError::TamperedFiles { names } => {
                write!(f, "{} locally modified file(s) were not updated", names.len())
            }
            SyncError::DownloadFailed { reason } => {
                write!(f, "Downloads failed: {}", reason)
            }
            SyncError::Interrupted => write!(f, "Sync was interrupted"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::ReadFailed { source, .. } => Some(source),
            SyncError::WriteFailed { source, .. } => Some(source),
            SyncError::RemoveFailed { source, .. } => Some(source),
            SyncError::RenameFailed { source, .. } => Some(source),
            SyncError::ManifestParse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
