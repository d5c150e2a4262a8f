//! Positioned I/O over the managed stream

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Byte-addressed access to any seekable stream
///
/// Every read and write seeks first, so callers never track the cursor.
pub struct PagedStream<S> {
    inner: S,
    path: Option<PathBuf>,
}

impl<S: Read + Write + Seek> PagedStream<S> {
    pub fn new(inner: S) -> Self {
        PagedStream { inner, path: None }
    }

    /// Fill `buf` from `offset`, failing on a short read
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)?;
        Ok(())
    }

    pub fn read_vec(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_at(offset, &mut buffer)?;
        Ok(buffer)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Current length of the stream in bytes
    pub fn len(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Grow the stream with zero bytes until it is at least `len` bytes long
    pub fn extend_to(&mut self, len: u64) -> Result<()> {
        let current = self.len()?;
        if current < len {
            trace!(from = current, to = len, "extending stream");
            self.write_at(len - 1, &[0])?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Path of the backing file, when opened through the file helpers
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl PagedStream<File> {
    /// Create (or truncate) a file-backed stream
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(PagedStream {
            inner: file,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Open an existing file-backed stream
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(PagedStream {
            inner: file,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.inner.sync_all()?;
        Ok(())
    }
}
