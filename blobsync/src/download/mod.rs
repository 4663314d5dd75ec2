//! Pack download pipeline.
//!
//! This module turns a list of wanted files into verified content on disk,
//! including:
//! - Grouping files into per-pack work orders (`plan`)
//! - Streaming extraction with per-file SHA-1 verification (`extract`)
//! - A worker pool with retries and stall detection (`orchestrator`)
//! - Shared progress counters and cooperative cancellation (`progress`)
//! - A compressed pack cache shared between working trees (`cache`)
//! - The HTTP transport seam (`http`)
//!
//! # Architecture
//!
//! ```text
//! PackDownloader (orchestrator)
//!         │
//!         ├── VecDeque<IncomingPack>      shared work queue
//!         │
//!         ├── Worker × N
//!         │       ├── PackCache          try a cached pack first
//!         │       └── HttpClient (trait)
//!         │               └── GET → CountingReader → TeeReader → gzip
//!         │                            │               │          │
//!         │                        progress        cache fork   extract_pack
//!         │
//!         └── DownloadCounters           sampled by the monitor loop
//! ```
//!
//! Every attempt is all or nothing: outputs are staged with an
//! [`INCOMING_SUFFIX`] name and renamed only after verification, and a
//! failed attempt rolls its byte count back out of the shared counters.

mod cache;
mod error;
mod extract;
mod http;
mod orchestrator;
mod plan;
mod progress;
mod stream;

// Public API - types used by the sync layer and the CLI
pub use cache::PackCache;
pub use error::PackError;
pub use extract::{extract_pack, INCOMING_SUFFIX};
pub use http::{HttpClient, ReqwestClient};
pub use orchestrator::{DownloadError, PackDownloader};
pub use plan::{plan_packs, IncomingFile, IncomingPack, PackPlan};
pub use progress::{CancelToken, DownloadCounters, DownloadSnapshot};

pub(crate) use extract::incoming_path;
