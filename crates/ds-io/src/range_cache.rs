//! Sparse, file-backed cache shared by every reader of a remote stream.
//!
//! The backing file is sized to the content length up front. Writers copy
//! proxied response bodies into it at their offset and record the populated
//! interval afterwards, so a reader that observes an interval always finds
//! the bytes on disk. Readers block (10 ms ticks) until the byte at their
//! position is covered.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ds_core::{Error, Result};
use parking_lot::Mutex;
use rangemap::RangeInclusiveSet;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Chunk size used when teeing upstream bodies.
pub const TEE_CHUNK_SIZE: usize = 32 * 1024;

const READ_RETRY: Duration = Duration::from_millis(10);

struct Inner {
    file: File,
    path: Mutex<Option<TempPath>>,
    len: u64,
    intervals: Mutex<RangeInclusiveSet<u64>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    next_reader: AtomicU64,
    readers: Mutex<Vec<u64>>,
}

/// Cheaply cloneable handle to one stream's cache.
#[derive(Clone)]
pub struct RangeCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeCache")
            .field("len", &self.inner.len)
            .field("closed", &self.is_closed())
            .field("intervals", &self.intervals())
            .finish()
    }
}

impl RangeCache {
    /// Allocate a temporary file of exactly `len` bytes.
    ///
    /// `cancel` scopes the cache: once it fires, waiting readers fail and
    /// running tees stop.
    pub fn open(len: u64, dir: Option<&Path>, cancel: CancellationToken) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ds-cache-");
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = named.into_parts();
        file.set_len(len)?;
        debug!(len, path = %path.display(), "Opened range cache");

        Ok(Self {
            inner: Arc::new(Inner {
                file,
                path: Mutex::new(Some(path)),
                len,
                intervals: Mutex::new(RangeInclusiveSet::new()),
                closed: AtomicBool::new(false),
                cancel,
                next_reader: AtomicU64::new(1),
                readers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn len(&self) -> u64 {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Delete the backing file and wake every reader with EOF.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(path) = self.inner.path.lock().take() {
            if let Err(e) = path.close() {
                debug!(error = %e, "Failed to remove range cache file");
            }
        }
        debug!(len = self.inner.len, "Closed range cache");
    }

    /// Snapshot of the populated intervals, in order.
    pub fn intervals(&self) -> Vec<(u64, u64)> {
        self.inner
            .intervals
            .lock()
            .iter()
            .map(|r| (*r.start(), *r.end()))
            .collect()
    }

    /// True when every byte of `[start, end]` is populated.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        if start > end {
            return true;
        }
        self.inner
            .intervals
            .lock()
            .get(&start)
            .is_some_and(|r| *r.end() >= end)
    }

    /// Start of the populated interval containing `pos`.
    pub fn populated_start(&self, pos: u64) -> Option<u64> {
        self.inner.intervals.lock().get(&pos).map(|r| *r.start())
    }

    /// Populated bytes starting at `pos`, capped at `want`.
    pub fn available_at(&self, pos: u64, want: u64) -> u64 {
        available(&self.inner, pos, want)
    }

    /// Ids of the readers currently alive, in creation order.
    pub fn live_readers(&self) -> Vec<u64> {
        self.inner.readers.lock().clone()
    }

    /// A new independent reader positioned at 0.
    pub fn new_reader(&self) -> RangeCacheReader {
        self.new_scoped_reader(self.inner.cancel.clone())
    }

    /// A reader that also gives up when `cancel` fires.
    pub fn new_scoped_reader(&self, cancel: CancellationToken) -> RangeCacheReader {
        let id = self.inner.next_reader.fetch_add(1, Ordering::Relaxed);
        self.inner.readers.lock().push(id);
        trace!(reader = id, "Range cache reader created");
        RangeCacheReader {
            inner: self.inner.clone(),
            id,
            pos: 0,
            cancel,
        }
    }

    /// Copy `src` into the cache at `offset`, forwarding each chunk downstream.
    ///
    /// Returns the number of bytes copied. Stops early when the downstream
    /// receiver is dropped. Bytes past the cache length are forwarded but not
    /// stored.
    pub async fn write_and_tee<S>(
        &self,
        mut src: S,
        downstream: Option<mpsc::Sender<io::Result<Bytes>>>,
        mut offset: u64,
    ) -> Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut downstream = downstream;
        let mut buf = vec![0u8; TEE_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            if self.is_closed() {
                return Err(Error::Closed("range cache".into()));
            }
            let n = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(Error::Cancelled),
                n = src.read(&mut buf) => n?,
            };
            if n == 0 {
                break;
            }

            let chunk = &buf[..n];
            if offset < self.inner.len {
                let storable = (self.inner.len - offset).min(n as u64) as usize;
                self.write_at(&chunk[..storable], offset)?;
                self.mark(offset, offset + storable as u64 - 1);
            }
            offset += n as u64;
            total += n as u64;

            if let Some(tx) = &downstream {
                if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                    debug!(offset, "Downstream closed, stopping tee");
                    downstream = None;
                    break;
                }
            }
        }
        drop(downstream);
        trace!(total, end = offset, "Tee finished");
        Ok(total)
    }

    /// Write bytes directly (used when the source is not a stream).
    pub fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("range cache".into()));
        }
        if data.is_empty() || offset >= self.inner.len {
            return Ok(());
        }
        let storable = (self.inner.len - offset).min(data.len() as u64) as usize;
        self.write_at(&data[..storable], offset)?;
        self.mark(offset, offset + storable as u64 - 1);
        Ok(())
    }

    fn mark(&self, start: u64, end: u64) {
        self.inner.intervals.lock().insert(start..=end);
    }

    fn write_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        positioned::write_all_at(&self.inner.file, data, offset)
    }
}

/// Blocking `Read + Seek` view over a [`RangeCache`].
///
/// Meant to run on a blocking thread: `read` sleeps while the bytes at the
/// current position are not populated yet.
pub struct RangeCacheReader {
    inner: Arc<Inner>,
    id: u64,
    pos: u64,
    cancel: CancellationToken,
}

impl RangeCacheReader {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

fn available(inner: &Inner, pos: u64, want: u64) -> u64 {
    match inner.intervals.lock().get(&pos) {
        Some(r) => (*r.end() - pos + 1).min(want),
        None => 0,
    }
}

impl Read for RangeCacheReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.inner.len {
            return Ok(0);
        }
        loop {
            let n = available(&self.inner, self.pos, buf.len() as u64);
            if n > 0 {
                let n = n as usize;
                positioned::read_exact_at(&self.inner.file, &mut buf[..n], self.pos)?;
                self.pos += n as u64;
                return Ok(n);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            if self.cancel.is_cancelled() || self.inner.cancel.is_cancelled() {
                return Err(Error::Closed("range cache scope ended".into()).into_io());
            }
            std::thread::sleep(READ_RETRY);
        }
    }
}

impl Seek for RangeCacheReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.inner.len.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of cache")
        })?;
        self.pos = target;
        Ok(target)
    }
}

impl Drop for RangeCacheReader {
    fn drop(&mut self) {
        self.inner.readers.lock().retain(|id| *id != self.id);
    }
}

#[cfg(unix)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
        file.write_all_at(data, offset)
    }

    pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        file.read_exact_at(buf, offset)
    }
}

#[cfg(windows)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
        while !data.is_empty() {
            let n = file.seek_write(data, offset)?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }

    pub fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            let n = file.seek_read(buf, offset)?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            buf = &mut buf[n..];
            offset += n as u64;
        }
        Ok(())
    }
}
