//! Per-attempt download errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Outcome classification for one pack fetch or extraction attempt.
///
/// Workers choose retry behaviour from the variant instead of matching on
/// message text, and the cache uses it to tell a bad entry (evict and fall
/// back to the network) from a failed output write (surface to the caller).
#[derive(Debug, Error)]
pub enum PackError {
    /// The pack bytes did not decode or verify. Retrying can fetch a good
    /// copy.
    #[error("corrupt pack: {0}")]
    Corrupt(String),

    /// The transfer failed.
    #[error("{0}")]
    Network(String),

    /// A local file operation failed while producing outputs.
    #[error("failed writing {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run was cancelled while the attempt was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl PackError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        PackError::Corrupt(message.into())
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        PackError::Network(message.into())
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackError::File {
            path: path.into(),
            source,
        }
    }

    /// Whether this attempt failed because the pack content itself was bad.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, PackError::Corrupt(_))
    }
}
