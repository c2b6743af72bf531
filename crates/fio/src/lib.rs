//! # fio — File I/O back-ends
//!
//! Byte-level access to a single log file behind a common [`IoManager`]
//! contract. Two back-ends exist:
//!
//! * [`FileIo`] — a buffered OS file opened read/write/create/append. This is
//!   the steady-state back-end: appends go through the kernel page cache and
//!   `sync()` makes them durable.
//! * [`MmapIo`] — a **read-only** memory map. Opening a database scans every
//!   existing file from offset 0 to EOF; doing that through a map avoids a
//!   `pread` syscall per record. Writing through this back-end is a contract
//!   violation and fails with [`ErrorKind::Unsupported`].
//!
//! The engine opens files with [`IoKind::Mmap`] during recovery (when
//! configured to) and rebinds every file to [`IoKind::Standard`] once the
//! index is loaded.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;

/// Which back-end to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// Buffered read/write file, the steady-state back-end.
    Standard,
    /// Read-only memory map, used to accelerate recovery scans.
    Mmap,
}

/// Byte-level contract over one file.
///
/// `read_at` and `append` report the number of bytes transferred; callers
/// treat a short count as an error where exact framing matters.
pub trait IoManager: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Appends `buf` at the end of the file, returning the bytes written.
    fn append(&self, buf: &[u8]) -> io::Result<usize>;

    /// Durably flushes written data to disk.
    fn sync(&self) -> io::Result<()>;

    /// Current file size in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// Opens the back-end selected by `kind` for `path`.
pub fn open(path: &Path, kind: IoKind) -> io::Result<Box<dyn IoManager>> {
    match kind {
        IoKind::Standard => Ok(Box::new(FileIo::open(path)?)),
        IoKind::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}

/// Buffered file back-end: `pread` for reads, appending writes, `fsync` on
/// demand.
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Opens (or creates) `path` read/write in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoManager for FileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    fn append(&self, buf: &[u8]) -> io::Result<usize> {
        // &File implements Write; the fd is in O_APPEND mode so concurrent
        // appenders cannot interleave within one write_all.
        let mut f = &self.file;
        f.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory-mapped back-end.
///
/// An empty file cannot be mapped on Linux, so `map` is `None` until the file
/// has content; reads against it behave like reads past EOF.
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Opens `path` (creating it if absent, so recovery can map a file that a
    /// crashed process never wrote to) and maps it read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the engine holds an exclusive directory lock, and data
            // files are append-only; the mapped prefix is never mutated.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }
}

impl IoManager for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Some(map) = self.map.as_ref() else {
            return Ok(0);
        };
        if offset >= map.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(map.len() - start);
        buf[..n].copy_from_slice(&map[start..start + n]);
        Ok(n)
    }

    fn append(&self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "mmap back-end is read-only",
        ))
    }

    fn sync(&self) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "mmap back-end is read-only",
        ))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests;
