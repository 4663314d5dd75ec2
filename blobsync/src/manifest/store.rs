//! Crash-safe persistence for the working manifest.
//!
//! Saves go through a temp file: serialize to `.blobsync.tmp`, delete the
//! previous `.blobsync`, rename the temp into place. A crash between the
//! two last steps leaves the temp as the only copy, which
//! [`StateFile::recover`] promotes at the start of the next run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

use super::working::WorkingManifest;

/// Filename of the working-state document at the tree root.
pub const STATE_FILE_NAME: &str = ".blobsync";

const TEMP_SUFFIX: &str = ".tmp";

/// Handle to a working tree's state document.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    temp_path: PathBuf,
}

impl StateFile {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(STATE_FILE_NAME),
            temp_path: root.join(format!("{}{}", STATE_FILE_NAME, TEMP_SUFFIX)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Promote or discard a temp file left behind by an interrupted save.
    pub fn recover(&self) -> SyncResult<()> {
        if !self.temp_path.exists() {
            return Ok(());
        }
        if self.path.exists() {
            // The final write completed; the temp is residue.
            debug!(path = %self.temp_path.display(), "discarding stale state temp");
            fs::remove_file(&self.temp_path).map_err(|e| SyncError::RemoveFailed {
                path: self.temp_path.clone(),
                source: e,
            })?;
        } else {
            warn!(path = %self.path.display(), "recovering working state from interrupted save");
            fs::rename(&self.temp_path, &self.path).map_err(|e| SyncError::RenameFailed {
                from: self.temp_path.clone(),
                to: self.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Load the working manifest, or an empty one when the document is
    /// missing or unreadable. State is reconstructible by re-hashing, so a
    /// broken document is never fatal.
    pub fn load(&self) -> WorkingManifest {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return WorkingManifest::default(),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "unreadable working state, starting fresh");
                return WorkingManifest::default();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "corrupt working state, starting fresh");
                WorkingManifest::default()
            }
        }
    }

    /// Persist the manifest with the temp-then-rename protocol.
    pub fn save(&self, manifest: &WorkingManifest) -> SyncResult<()> {
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| SyncError::WriteFailed {
            path: self.temp_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        fs::write(&self.temp_path, json).map_err(|e| SyncError::WriteFailed {
            path: self.temp_path.clone(),
            source: e,
        })?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SyncError::RemoveFailed {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
        fs::rename(&self.temp_path, &self.path).map_err(|e| SyncError::RenameFailed {
            from: self.temp_path.clone(),
            to: self.path.clone(),
            source: e,
        })
    }
}
