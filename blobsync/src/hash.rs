//! SHA-1 content hashing.
//!
//! File, blob, and pack identities are all lowercase hexadecimal SHA-1
//! digests of the uncompressed content. Comparisons elsewhere in the crate
//! assume the lowercase form produced here.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{SyncError, SyncResult};

/// Buffer size for streaming hash calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha1::digest(data))
}

/// Hash everything a reader yields.
///
/// # Returns
///
/// The lowercase hexadecimal SHA-1 digest of the bytes read.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash a file's contents.
///
/// # Errors
///
/// Returns [`SyncError::ReadFailed`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> SyncResult<String> {
    let mut file = File::open(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    hash_reader(&mut file).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}
