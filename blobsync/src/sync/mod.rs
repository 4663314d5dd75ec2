//! Sync engine.
//!
//! Ties the manifest, diff, and download layers into the two-step flow the
//! CLI drives:
//!
//! - [`Syncer::plan`] recovers interrupted state, scans the manifests, and
//!   diffs them against the working tree into a [`SyncPlan`]
//! - [`Syncer::apply`] deletes obsolete files, downloads missing content,
//!   and records the result in the working manifest
//!
//! Splitting plan from apply is what makes dry runs and interactive
//! overwrite prompts possible: the caller can inspect
//! [`SyncPlan::changes`], ask the user about [`SyncPlan::tampered`] files,
//! and resolve the plan before anything touches disk.
//!
//! # Example
//!
//! ```ignore
//! use blobsync::{SyncConfig, Syncer, CancelToken};
//!
//! let config = SyncConfig::new("/path/to/tree");
//! let syncer = Syncer::new(config)?;
//!
//! let plan = syncer.plan()?;
//! if !plan.is_noop() {
//!     let report = syncer.apply(plan, &CancelToken::new(), |snapshot| {
//!         println!("{}%", snapshot.percent());
//!     })?;
//!     println!("downloaded {} files", report.downloaded);
//! }
//! ```

mod diff;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{OverwritePolicy, SyncConfig};
use crate::download::{
    incoming_path, plan_packs, CancelToken, DownloadError, DownloadSnapshot, HttpClient,
    PackCache, PackDownloader, ReqwestClient,
};
use crate::error::{SyncError, SyncResult};
use crate::manifest::{
    file_timestamp, FileEntry, StateFile, TargetIndex, WorkingFile, WorkingManifest,
};
use crate::platform;

/// Age a cache staging file must reach before the pre-sync sweep deletes
/// it. Generous enough that a concurrent sync's live writers are safe.
const CACHE_TEMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Everything one sync run intends to do.
///
/// Produced by [`Syncer::plan`]; consumed by [`Syncer::apply`]. When
/// [`SyncPlan::tampered`] is non-empty and the policy is
/// [`OverwritePolicy::Prompt`], the caller must call
/// [`SyncPlan::resolve_tampered`] before applying.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub(crate) to_download: Vec<FileEntry>,
    pub(crate) to_remove: Vec<String>,
    pub(crate) tampered: Vec<String>,
    pub(crate) tampered_entries: Vec<WorkingFile>,
    pub(crate) present_before: HashSet<String>,
    pub(crate) resolution: Option<bool>,
    pub(crate) working: WorkingManifest,
    pub(crate) index: TargetIndex,
}

impl SyncPlan {
    /// Whether the tree is already in sync.
    pub fn is_noop(&self) -> bool {
        self.to_download.is_empty() && self.to_remove.is_empty() && self.tampered.is_empty()
    }

    pub fn download_count(&self) -> usize {
        self.to_download.len()
    }

    /// Names of files whose local content differs from what the last sync
    /// put there, sorted.
    pub fn tampered(&self) -> &[String] {
        &self.tampered
    }

    /// The plan as user-facing add/update/remove lines, sorted by name.
    pub fn changes(&self) -> Vec<SyncChange> {
        let downloads: HashSet<String> = self
            .to_download
            .iter()
            .map(|f| f.name.to_lowercase())
            .collect();

        let mut changes = Vec::new();
        for name in self.to_remove.iter().chain(self.tampered.iter()) {
            if !downloads.contains(&name.to_lowercase()) {
                changes.push(SyncChange::Remove(name.clone()));
            }
        }
        for file in &self.to_download {
            if self.present_before.contains(&file.name.to_lowercase()) {
                changes.push(SyncChange::Update(file.name.clone()));
            } else {
                changes.push(SyncChange::Add(file.name.clone()));
            }
        }
        changes.sort_by(|a, b| a.name().cmp(b.name()));
        changes
    }

    /// Decide what happens to the tampered files.
    ///
    /// `overwrite = true` schedules them for deletion so the download can
    /// replace them. `overwrite = false` keeps the user's content: the
    /// files drop out of the download list and their current state is
    /// carried in the working manifest, so the next run flags them again
    /// instead of mistaking them for synced content.
    pub fn resolve_tampered(&mut self, overwrite: bool) {
        if self.resolution.is_some() {
            return;
        }
        if overwrite {
            self.to_remove.extend(self.tampered.iter().cloned());
            self.to_remove.sort();
            self.tampered_entries.clear();
        } else {
            let kept: HashSet<String> = self.tampered.iter().map(|n| n.to_lowercase()).collect();
            self.working
                .files
                .retain(|f| !kept.contains(&f.name.to_lowercase()));
            self.working.files.extend(self.tampered_entries.drain(..));
            self.working.files.sort_by(|a, b| a.name.cmp(&b.name));
            self.to_download
                .retain(|f| !kept.contains(&f.name.to_lowercase()));
        }
        self.resolution = Some(overwrite);
    }
}

/// One line of a plan, for dry runs and verbose output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncChange {
    Add(String),
    Update(String),
    Remove(String),
}

impl SyncChange {
    pub fn name(&self) -> &str {
        match self {
            SyncChange::Add(name) | SyncChange::Update(name) | SyncChange::Remove(name) => name,
        }
    }
}

impl fmt::Display for SyncChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncChange::Add(name) => write!(f, "Add {}", name),
            SyncChange::Update(name) => write!(f, "Update {}", name),
            SyncChange::Remove(name) => write!(f, "Remove {}", name),
        }
    }
}

/// What a completed sync did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Files downloaded and verified.
    pub downloaded: usize,

    /// Obsolete files deleted.
    pub removed: usize,

    /// Bytes fetched over the network.
    pub bytes_fetched: u64,

    /// Declared bytes served from the pack cache.
    pub bytes_cached: u64,

    /// Modified files left untouched at the user's request.
    pub tampered_kept: Vec<String>,
}

/// Synchronizes one working tree against its dependency manifests.
pub struct Syncer {
    config: SyncConfig,
    http: Arc<dyn HttpClient>,
}

impl Syncer {
    /// Create a syncer with the production HTTP transport.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built, for instance because
    /// the configured proxy URL does not parse.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let http = ReqwestClient::new(config.proxy.as_ref()).map_err(|e| {
            SyncError::DownloadFailed {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            config,
            http: Arc::new(http),
        })
    }

    /// Create a syncer over a caller-supplied transport.
    pub fn with_http_client(config: SyncConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Work out what this tree needs.
    ///
    /// Recovers from an interrupted save, sweeps staging files a crashed
    /// download left behind, scans and merges the manifests, and diffs the
    /// result against the tree. [`OverwritePolicy::Prompt`] plans come
    /// back unresolved when they contain tampered files; the other
    /// policies resolve here.
    ///
    /// # Errors
    ///
    /// Manifest scan and parse failures, hashing failures, and failures to
    /// delete stale staging files are all fatal for the plan.
    pub fn plan(&self) -> SyncResult<SyncPlan> {
        let root = &self.config.root;
        info!(root = %root.display(), "checking dependencies");

        let state = StateFile::for_root(root);
        state.recover()?;
        let previous = state.load();

        // Downloads that never finished leave their staging file next to
        // the target; they are useless without the run that wrote them.
        for entry in &previous.files {
            if entry.is_pending() {
                let staged = incoming_path(&root.join(&entry.name));
                match fs::remove_file(&staged) {
                    Ok(()) => debug!(path = %staged.display(), "removed interrupted download"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(SyncError::RemoveFailed {
                            path: staged,
                            source: e,
                        })
                    }
                }
            }
        }

        if let Some(cache_dir) = &self.config.cache_dir {
            PackCache::new(cache_dir).sweep_incomplete(CACHE_TEMP_MAX_AGE);
        }

        let index = TargetIndex::scan(root)?;
        let mut plan = diff::compute(root, previous, index, &self.config.filter)?;
        match self.config.overwrite {
            OverwritePolicy::Force => plan.resolve_tampered(true),
            OverwritePolicy::KeepUnchanged => plan.resolve_tampered(false),
            OverwritePolicy::Prompt => {}
        }
        Ok(plan)
    }

    /// Execute a plan.
    ///
    /// Deletes obsolete files, persists the pending working manifest,
    /// downloads and verifies missing content, then finalizes the manifest
    /// and the executable bits. `on_progress` receives download snapshots
    /// on a fixed interval.
    ///
    /// # Errors
    ///
    /// [`SyncError::TamperedFiles`] when the plan still has unresolved
    /// tampered files, or at the end of a
    /// [`OverwritePolicy::KeepUnchanged`] run that had to leave modified
    /// files behind; [`SyncError::Interrupted`] when the cancel token
    /// fired; [`SyncError::DownloadFailed`] when the downloads stalled.
    pub fn apply(
        &self,
        mut plan: SyncPlan,
        cancel: &CancelToken,
        on_progress: impl FnMut(&DownloadSnapshot),
    ) -> SyncResult<SyncReport> {
        let root = &self.config.root;

        if !plan.tampered.is_empty() && plan.resolution.is_none() {
            return Err(SyncError::TamperedFiles {
                names: plan.tampered.clone(),
            });
        }

        let mut report = SyncReport::default();
        if plan.resolution == Some(false) {
            report.tampered_kept = plan.tampered.clone();
        }

        for name in &plan.to_remove {
            let path = root.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(name = %name, "removed obsolete file");
                    report.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::RemoveFailed { path, source: e }),
            }
        }

        // Persist the pending entries before any bytes move; a crash
        // between here and the final save is what the startup sweep and
        // the re-download of pending entries recover from.
        let state = StateFile::for_root(root);
        state.save(&plan.working)?;

        if !plan.to_download.is_empty() {
            let packs = plan_packs(root, &plan.to_download, &plan.index)?;
            info!(
                files = plan.to_download.len(),
                packs = packs.packs.len(),
                "downloading dependencies"
            );

            let cache = self
                .config
                .cache_dir
                .as_ref()
                .map(|dir| Arc::new(PackCache::new(dir)));
            let downloader = PackDownloader::new(
                Arc::clone(&self.http),
                cache,
                self.config.threads,
                self.config.max_retries,
            );
            let snapshot = downloader
                .download(packs, cancel, on_progress)
                .map_err(|e| match e {
                    DownloadError::Cancelled => SyncError::Interrupted,
                    DownloadError::Stalled { reason } => SyncError::DownloadFailed { reason },
                })?;

            report.downloaded = plan.to_download.len();
            report.bytes_fetched = snapshot.bytes_read;
            report.bytes_cached = snapshot.bytes_cached;

            // Every pending entry's file is on disk and verified now;
            // record the content and its timestamp.
            for entry in &mut plan.working.files {
                if entry.hash.is_none() {
                    let path = root.join(&entry.name);
                    entry.hash = entry.expected_hash.clone();
                    entry.timestamp =
                        file_timestamp(&path).map_err(|e| SyncError::ReadFailed {
                            path: path.clone(),
                            source: e,
                        })?;
                }
            }
            state.save(&plan.working)?;
        }

        let permissions = platform::detect();
        for target in plan.index.files() {
            if !target.executable || self.config.filter.is_excluded(&target.name) {
                continue;
            }
            let path = root.join(&target.name);
            if !path.is_file() {
                continue;
            }
            if let Err(e) = permissions.make_executable(&path) {
                warn!(error = %e, name = %target.name, "could not set executable bit");
            }
        }

        // KeepUnchanged still syncs everything it safely can, but the run
        // as a whole must not report success.
        if self.config.overwrite == OverwritePolicy::KeepUnchanged && !plan.tampered.is_empty() {
            return Err(SyncError::TamperedFiles {
                names: plan.tampered,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::PackError;
    use std::io::Read;
    use tempfile::TempDir;

    struct NoNetwork;

    impl HttpClient for NoNetwork {
        fn get(&self, url: &str, _use_proxy: bool) -> Result<Box<dyn Read + Send>, PackError> {
            Err(PackError::Network(format!("unexpected request for {}", url)))
        }
    }

    fn offline_syncer(config: SyncConfig) -> Syncer {
        Syncer::with_http_client(config, Arc::new(NoNetwork))
    }

    fn entry(name: &str, hash: &str, expected: &str) -> WorkingFile {
        WorkingFile {
            name: name.to_string(),
            hash: Some(hash.to_string()),
            expected_hash: Some(expected.to_string()),
            timestamp: 7,
        }
    }

    #[test]
    fn test_changes_bucketing() {
        let plan = SyncPlan {
            to_download: vec![
                FileEntry {
                    name: "new.bin".to_string(),
                    hash: "h1".to_string(),
                    executable: false,
                },
                FileEntry {
                    name: "changed.bin".to_string(),
                    hash: "h2".to_string(),
                    executable: false,
                },
            ],
            to_remove: vec!["changed.bin".to_string(), "gone.bin".to_string()],
            tampered: vec!["kept.bin".to_string()],
            present_before: ["changed.bin".to_string()].into_iter().collect(),
            ..SyncPlan::default()
        };

        let rendered: Vec<String> = plan.changes().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "Update changed.bin".to_string(),
                "Remove gone.bin".to_string(),
                "Remove kept.bin".to_string(),
                "Add new.bin".to_string(),
            ]
        );
    }

    #[test]
    fn test_resolve_overwrite_schedules_removal() {
        let mut plan = SyncPlan {
            tampered: vec!["a.bin".to_string()],
            tampered_entries: vec![entry("a.bin", "user", "wanted")],
            to_remove: vec!["z.bin".to_string()],
            ..SyncPlan::default()
        };

        plan.resolve_tampered(true);

        assert_eq!(plan.to_remove, vec!["a.bin".to_string(), "z.bin".to_string()]);
        assert!(plan.tampered_entries.is_empty());
        assert_eq!(plan.resolution, Some(true));
    }

    #[test]
    fn test_resolve_keep_preserves_user_state() {
        let mut plan = SyncPlan {
            to_download: vec![FileEntry {
                name: "a.bin".to_string(),
                hash: "wanted".to_string(),
                executable: false,
            }],
            tampered: vec!["a.bin".to_string()],
            tampered_entries: vec![entry("a.bin", "user", "old")],
            working: WorkingManifest {
                files: vec![WorkingFile::pending("a.bin", "wanted")],
            },
            ..SyncPlan::default()
        };

        plan.resolve_tampered(false);

        // Download dropped; tracking carries the user's actual content so
        // the next run detects the modification again.
        assert!(plan.to_download.is_empty());
        assert_eq!(plan.working.files.len(), 1);
        assert_eq!(plan.working.files[0].hash.as_deref(), Some("user"));
        assert!(!plan.working.files[0].is_pending());
        // Names stay listed for reporting.
        assert_eq!(plan.tampered, vec!["a.bin".to_string()]);
    }

    #[test]
    fn test_resolve_is_sticky() {
        let mut plan = SyncPlan {
            tampered: vec!["a.bin".to_string()],
            tampered_entries: vec![entry("a.bin", "user", "old")],
            ..SyncPlan::default()
        };

        plan.resolve_tampered(false);
        plan.resolve_tampered(true);

        assert_eq!(plan.resolution, Some(false));
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_apply_rejects_unresolved_tampered() {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig::new(temp.path()).with_overwrite(OverwritePolicy::Prompt);
        let syncer = offline_syncer(config);

        let plan = SyncPlan {
            tampered: vec!["a.bin".to_string()],
            ..SyncPlan::default()
        };

        match syncer.apply(plan, &CancelToken::new(), |_| {}) {
            Err(SyncError::TamperedFiles { names }) => {
                assert_eq!(names, vec!["a.bin".to_string()]);
            }
            other => panic!("expected TamperedFiles, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_apply_removes_and_reports() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old.bin"), b"x").unwrap();

        let config = SyncConfig::new(temp.path());
        let syncer = offline_syncer(config);
        let plan = SyncPlan {
            to_remove: vec!["old.bin".to_string()],
            ..SyncPlan::default()
        };

        let report = syncer.apply(plan, &CancelToken::new(), |_| {}).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.downloaded, 0);
        assert!(!temp.path().join("old.bin").exists());
        assert!(temp.path().join(".blobsync").is_file());
    }

    #[test]
    fn test_apply_keep_unchanged_fails_after_syncing_rest() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old.bin"), b"x").unwrap();
        fs::write(temp.path().join("mine.bin"), b"user content").unwrap();

        let config = SyncConfig::new(temp.path());
        assert_eq!(config.overwrite, OverwritePolicy::KeepUnchanged);
        let syncer = offline_syncer(config);

        let mut plan = SyncPlan {
            to_remove: vec!["old.bin".to_string()],
            tampered: vec!["mine.bin".to_string()],
            tampered_entries: vec![entry("mine.bin", "user", "wanted")],
            ..SyncPlan::default()
        };
        plan.resolve_tampered(false);

        let err = syncer
            .apply(plan, &CancelToken::new(), |_| {})
            .unwrap_err();

        // The safe work happened even though the run fails overall.
        assert!(matches!(err, SyncError::TamperedFiles { .. }), "got {:?}", err);
        assert!(!temp.path().join("old.bin").exists());
        assert!(temp.path().join("mine.bin").exists());
    }
}
