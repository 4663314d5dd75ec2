//! Stream adapters for the download pipeline.
//!
//! A network attempt reads through a small stack of wrappers: a
//! [`CountingReader`] feeding the shared progress counters, an optional
//! [`TeeReader`] forking the raw compressed bytes into a cache temp file,
//! and a [`HashingReader`] accumulating the whole-pack digest of the
//! decompressed stream.

use std::io::{self, Read, Write};

use sha1::{Digest, Sha1};
use tracing::warn;

/// Invokes a callback with the size of every successful read.
pub struct CountingReader<R, F> {
    inner: R,
    on_read: F,
}

impl<R: Read, F: FnMut(u64)> CountingReader<R, F> {
    pub fn new(inner: R, on_read: F) -> Self {
        Self { inner, on_read }
    }
}

impl<R: Read, F: FnMut(u64)> Read for CountingReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.on_read)(n as u64);
        }
        Ok(n)
    }
}

/// Copies every byte read into a writer before handing it to the caller.
///
/// The sink is best effort: the first write failure disables the fork and
/// the stream carries on, so a broken cache target never fails a download.
pub struct TeeReader<R, W> {
    inner: R,
    sink: W,
    sink_ok: bool,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    pub fn new(inner: R, sink: W) -> Self {
        Self {
            inner,
            sink,
            sink_ok: true,
        }
    }

    /// Whether every byte read so far also reached the sink.
    pub fn sink_ok(&self) -> bool {
        self.sink_ok
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 && self.sink_ok {
            if let Err(e) = self.sink.write_all(&buf[..n]) {
                warn!(error = %e, "cache fork write failed, continuing without caching");
                self.sink_ok = false;
            }
        }
        Ok(n)
    }
}

/// Accumulates a SHA-1 digest of everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha1,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
        }
    }

    /// Finish the digest, releasing the wrapped reader.
    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}
