//! Streaming pack extraction.
//!
//! A pack decompresses to the concatenation of its blobs, and the planner
//! hands us the output files sorted by their byte range within that stream.
//! Extraction keeps a sliding window of open outputs: a file opens when the
//! stream first reaches its range, every block is fanned out to all open
//! files it overlaps, and the window head closes as soon as its range is
//! fully written. Outputs are staged next to their target with an
//! [`INCOMING_SUFFIX`] name and renamed into place only after their SHA-1
//! checks out, so an interrupted run never leaves a half-written target.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use super::error::PackError;
use super::plan::IncomingFile;
use super::progress::CancelToken;

/// Suffix for partially written output files.
pub const INCOMING_SUFFIX: &str = ".incoming";

const BLOCK_SIZE: usize = 64 * 1024;

/// Staging name for `path` while its content is still arriving.
pub(crate) fn incoming_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_os_string();
    staged.push(INCOMING_SUFFIX);
    PathBuf::from(staged)
}

/// Sort a stream read failure into the corrupt or network bucket.
///
/// Decoder errors and early end of stream mean the bytes themselves are bad;
/// anything else is the transport acting up.
pub(crate) fn classify_read_error(e: io::Error) -> PackError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            PackError::corrupt(format!("bad pack data: {}", e))
        }
        _ => PackError::network(format!("reading pack stream failed: {}", e)),
    }
}

struct OpenOutput {
    file: File,
    hasher: Sha1,
    temp: PathBuf,
}

/// The currently open slice of the sorted output list.
///
/// `files[min_open..max_open]` are open; everything before the window is
/// finished and everything after has not been reached yet. Dropping the
/// window deletes any staging files still open, which is what cleans up
/// after a failed extraction.
struct OutputWindow<'a> {
    files: &'a [IncomingFile],
    open: VecDeque<OpenOutput>,
    min_open: usize,
    max_open: usize,
}

impl<'a> OutputWindow<'a> {
    fn new(files: &'a [IncomingFile]) -> Self {
        OutputWindow {
            files,
            open: VecDeque::new(),
            min_open: 0,
            max_open: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.min_open == self.files.len()
    }

    /// Fan one decompressed block out to every file it overlaps, opening
    /// outputs as the stream reaches them.
    fn write_block(&mut self, block: &[u8], start: u64) -> Result<(), PackError> {
        let end = start + block.len() as u64;
        let mut idx = self.min_open;
        while idx < self.files.len() && self.files[idx].min_offset <= end {
            if idx == self.max_open {
                self.open_next()?;
            }
            let target = &self.files[idx];
            let from = target.min_offset.saturating_sub(start) as usize;
            let to = target.max_offset.min(end).saturating_sub(start) as usize;
            if to > from {
                let out = &mut self.open[idx - self.min_open];
                out.file
                    .write_all(&block[from..to])
                    .map_err(|e| PackError::file(&out.temp, e))?;
                out.hasher.update(&block[from..to]);
            }
            idx += 1;
        }
        Ok(())
    }

    fn open_next(&mut self) -> Result<(), PackError> {
        let target = &self.files[self.max_open];
        if let Some(parent) = target.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PackError::file(parent, e))?;
        }
        let temp = incoming_path(&target.path);
        let file = File::create(&temp).map_err(|e| PackError::file(&temp, e))?;
        self.open.push_back(OpenOutput {
            file,
            hasher: Sha1::new(),
            temp,
        });
        self.max_open += 1;
        Ok(())
    }

    /// Close window heads whose range the stream has fully covered.
    ///
    /// Only the head can close; a later file that happens to be complete
    /// waits its turn, which keeps open/closed a single contiguous split.
    fn finalize_ready(&mut self, end: u64) -> Result<(), PackError> {
        while self.min_open < self.max_open && self.files[self.min_open].max_offset <= end {
            let target = &self.files[self.min_open];
            match self.open.pop_front() {
                Some(out) => finalize_one(out, target)?,
                None => break,
            }
            self.min_open += 1;
        }
        Ok(())
    }
}

impl Drop for OutputWindow<'_> {
    fn drop(&mut self) {
        for out in self.open.drain(..) {
            let OpenOutput { file, temp, .. } = out;
            drop(file);
            let _ = fs::remove_file(&temp);
        }
    }
}

/// Verify one finished output and move it over its target.
fn finalize_one(out: OpenOutput, target: &IncomingFile) -> Result<(), PackError> {
    let OpenOutput { file, hasher, temp } = out;
    drop(file);

    let digest = format!("{:x}", hasher.finalize());
    if digest != target.hash {
        let _ = fs::remove_file(&temp);
        return Err(PackError::corrupt(format!(
            "incorrect hash for {}: expected {}, got {}",
            target.name, target.hash, digest
        )));
    }

    match fs::remove_file(&target.path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(PackError::file(&target.path, e));
        }
    }
    if let Err(e) = fs::rename(&temp, &target.path) {
        let _ = fs::remove_file(&temp);
        return Err(PackError::file(&target.path, e));
    }
    Ok(())
}

/// Split a decompressed pack stream into its output files.
///
/// `files` must be sorted ascending by `min_offset`. Reading stops as soon
/// as the last file closes, so trailing pack bytes are never pulled; a
/// stream that ends while files are still open is reported as corrupt.
/// Cancellation is checked once per block.
///
/// # Errors
///
/// [`PackError::Corrupt`] for bad bytes, early end of stream, or an output
/// hash mismatch; [`PackError::Network`] for transport failures surfaced by
/// the reader; [`PackError::File`] when an output cannot be written;
/// [`PackError::Cancelled`] when the token fires.
pub fn extract_pack<R: Read>(
    reader: &mut R,
    files: &[IncomingFile],
    cancel: &CancelToken,
) -> Result<(), PackError> {
    if files.is_empty() {
        return Ok(());
    }

    let mut window = OutputWindow::new(files);
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut offset = 0u64;
    while !window.is_complete() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let read = reader.read(&mut block).map_err(classify_read_error)?;
        if read == 0 {
            return Err(PackError::corrupt(
                "pack stream ended before every file was produced",
            ));
        }
        window.write_block(&block[..read], offset)?;
        offset += read as u64;
        window.finalize_ready(offset)?;
    }
    Ok(())
}
