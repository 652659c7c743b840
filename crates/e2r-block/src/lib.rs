#![forbid(unsafe_code)]
//! Positioned byte I/O for filesystem images.
//!
//! Provides the [`ByteDevice`] trait plus two implementations: a
//! file-backed device using `pread`/`pwrite` style syscalls, and an
//! in-memory device for tests. All access is bounds-checked against the
//! device length; every syscall failure carries the offset and length it
//! occurred at.

use e2r_error::{E2rError, Result};
use e2r_types::ByteOffset;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Running I/O counters for a device.
#[derive(Debug, Clone, Copy, Default)]
pub struct IoStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Byte-addressed device with fixed-offset read/write semantics.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`.
    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;

    /// Counters accumulated since the device was opened.
    fn stats(&self) -> IoStats;
}

fn check_bounds(offset: ByteOffset, len: usize, device_len: u64) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| E2rError::Format("I/O range overflows u64".to_owned()))?;
    if end.0 > device_len {
        return Err(E2rError::Format(format!(
            "I/O out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed byte device using `std::os::unix::fs::FileExt`, which does
/// not require a shared seek position.
#[derive(Debug)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
    stats: Mutex<IoStats>,
}

impl FileByteDevice {
    /// Open a filesystem image read-write, falling back to read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })
            .map_err(|e| E2rError::io_at(0, 0, e))?;
        let len = file
            .metadata()
            .map_err(|e| E2rError::io_at(0, 0, e))?
            .len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
            stats: Mutex::new(IoStats::default()),
        })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.file
            .read_exact_at(buf, offset.0)
            .map_err(|e| E2rError::io_at(offset.0, buf.len(), e))?;
        trace!(target: "e2r::block", offset = offset.0, len = buf.len(), "read");
        let mut stats = self.stats.lock();
        stats.reads += 1;
        stats.bytes_read += buf.len() as u64;
        Ok(())
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(E2rError::Format("image opened read-only".to_owned()));
        }
        check_bounds(offset, buf.len(), self.len)?;
        self.file
            .write_all_at(buf, offset.0)
            .map_err(|e| E2rError::io_at(offset.0, buf.len(), e))?;
        trace!(target: "e2r::block", offset = offset.0, len = buf.len(), "write");
        let mut stats = self.stats.lock();
        stats.writes += 1;
        stats.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| E2rError::io_at(0, 0, e))
    }

    fn stats(&self) -> IoStats {
        *self.stats.lock()
    }
}

/// In-memory byte device for tests.
#[derive(Debug)]
pub struct MemByteDevice {
    data: Mutex<Vec<u8>>,
    stats: Mutex<IoStats>,
}

impl MemByteDevice {
    /// Create a zero-filled device of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0_u8; size]),
            stats: Mutex::new(IoStats::default()),
        }
    }

    /// Wrap an existing image buffer.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            stats: Mutex::new(IoStats::default()),
        }
    }

    /// Copy out the full image contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        check_bounds(offset, buf.len(), data.len() as u64)?;
        let start = usize::try_from(offset.0)
            .map_err(|_| E2rError::Format("offset exceeds addressable range".to_owned()))?;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        let mut stats = self.stats.lock();
        stats.reads += 1;
        stats.bytes_read += buf.len() as u64;
        Ok(())
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        check_bounds(offset, buf.len(), data.len() as u64)?;
        let start = usize::try_from(offset.0)
            .map_err(|_| E2rError::Format("offset exceeds addressable range".to_owned()))?;
        data[start..start + buf.len()].copy_from_slice(buf);
        let mut stats = self.stats.lock();
        stats.writes += 1;
        stats.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> IoStats {
        *self.stats.lock()
    }
}
