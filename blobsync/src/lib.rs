//! blobsync - Binary dependency synchronizer for git working trees
//!
//! Git holds the sources; large binary dependencies live in compressed
//! packs on plain HTTP storage. Components of a repository describe what
//! they need in manifest documents under `deps/`, and blobsync makes the
//! working tree match: it downloads and unpacks what is missing, deletes
//! what no longer belongs, and leaves files the user modified alone
//! unless told otherwise.
//!
//! The flow is plan-then-apply:
//!
//! ```ignore
//! use blobsync::{CancelToken, SyncConfig, Syncer};
//!
//! let syncer = Syncer::new(SyncConfig::new("/path/to/tree"))?;
//! let plan = syncer.plan()?;
//! for change in plan.changes() {
//!     println!("  {}", change);
//! }
//! let report = syncer.apply(plan, &CancelToken::new(), |_| {})?;
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod platform;
pub mod sync;

// Public API - the types a typical caller needs by name.
pub use config::{resolve_cache_path, FolderFilter, OverwritePolicy, ProxySettings, SyncConfig};
pub use download::{CancelToken, DownloadSnapshot};
pub use error::{SyncError, SyncResult};
pub use sync::{SyncChange, SyncPlan, SyncReport, Syncer};
