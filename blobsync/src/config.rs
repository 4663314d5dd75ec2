//! Sync configuration.
//!
//! [`SyncConfig`] collects everything a run needs: the working tree root,
//! worker pool sizing, the overwrite policy for locally modified files, the
//! folder exclude filter, and the optional pack cache and proxy settings.
//! Follows the builder pattern so callers can override only what they need.
//!
//! # Example
//!
//! ```ignore
//! let config = SyncConfig::new("/work/tree")
//!     .with_threads(8)
//!     .with_overwrite(OverwritePolicy::Force);
//! ```

use std::path::{Path, PathBuf};

/// Default number of download worker threads.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of retries per worker before it counts as failing.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Directory name created under `.git` for the default pack cache.
const DEFAULT_CACHE_DIR_NAME: &str = "blobsync-cache";

/// What to do with files whose content no longer matches what the last sync
/// recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Leave modified files alone and fail the run (the safe default).
    #[default]
    KeepUnchanged,

    /// The caller asks the user once and resolves the plan accordingly.
    Prompt,

    /// Overwrite modified files without asking.
    Force,
}

/// HTTP(S) proxy settings for pack downloads.
///
/// Credentials given explicitly take precedence over any userinfo embedded
/// in the URL.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Case-insensitive folder exclude predicate.
///
/// A target file is excluded when any of its directory segments (never the
/// final filename segment) matches an excluded name.
#[derive(Debug, Clone, Default)]
pub struct FolderFilter {
    segments: Vec<String>,
}

impl FolderFilter {
    /// Build a filter from exclude names, minus any re-included names.
    pub fn new(excludes: &[String], includes: &[String]) -> Self {
        let mut segments: Vec<String> = excludes.iter().map(|s| s.to_lowercase()).collect();
        for name in includes {
            let lowered = name.to_lowercase();
            segments.retain(|s| *s != lowered);
        }
        segments.sort();
        segments.dedup();
        Self { segments }
    }

    /// Whether a relative path (with `/` separators) is excluded.
    pub fn is_excluded(&self, name: &str) -> bool {
        if self.segments.is_empty() {
            return false;
        }
        let mut parts = name.split('/').peekable();
        while let Some(part) = parts.next() {
            // The last segment is the filename, not a folder.
            if parts.peek().is_none() {
                break;
            }
            let lowered = part.to_lowercase();
            if self.segments.iter().any(|s| *s == lowered) {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Configuration for a sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the working tree being synchronized.
    pub root: PathBuf,

    /// Number of parallel download workers.
    pub threads: usize,

    /// Retries per worker before it reports itself as failing.
    pub max_retries: u32,

    /// Policy for locally modified files.
    pub overwrite: OverwritePolicy,

    /// Folder exclude filter applied to target files.
    pub filter: FolderFilter,

    /// Pack cache directory; `None` disables caching.
    pub cache_dir: Option<PathBuf>,

    /// Proxy for pack downloads; manifests can opt out per pack.
    pub proxy: Option<ProxySettings>,
}

impl SyncConfig {
    /// Create a configuration with defaults for the given working tree root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            threads: DEFAULT_THREADS,
            max_retries: DEFAULT_MAX_RETRIES,
            overwrite: OverwritePolicy::default(),
            filter: FolderFilter::default(),
            cache_dir: None,
            proxy: None,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_filter(mut self, filter: FolderFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Resolve the pack cache directory for a working tree.
///
/// An explicit path wins. Otherwise the ancestors of `root` are searched for
/// an enclosing `.git` directory and the cache lands inside it, so all
/// clones sharing that repository share the cache. No repository means no
/// cache.
pub fn resolve_cache_path(root: &Path, explicit: Option<PathBuf>, disabled: bool) -> Option<PathBuf> {
    if disabled {
        return None;
    }
    if let Some(path) = explicit {
        return Some(path);
    }
    for dir in root.ancestors() {
        let git_dir = dir.join(".git");
        if git_dir.is_dir() {
            return Some(git_dir.join(DEFAULT_CACHE_DIR_NAME));
        }
    }
    None
}
