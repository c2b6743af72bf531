//! Data files: numbered, append-only containers of log records.

use std::path::{Path, PathBuf};

use fio::{IoKind, IoManager};

use crate::record::{assemble_record, decode_header};
use crate::{LogRecord, Result, MAX_HEADER_SIZE};

/// Extension of numbered log files.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Key→position pairs written by merge to accelerate the next open.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Single-record marker carrying the merge watermark.
pub const MERGE_FINISH_FILE_NAME: &str = "merge-finish";
/// Persisted sequence counter (on-disk B+ tree index only).
pub const SEQUENCE_FILE_NAME: &str = "sequence-number";

/// Full path of the data file with the given id: nine zero-padded digits
/// plus `.data`.
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
}

/// One log file: a file id, the next append offset, and an I/O back-end.
///
/// Exactly one data file per engine is active (appended to); the rest are
/// sealed and read-only. Hint, merge-finish and sequence files reuse the same
/// record framing and are modelled as data files with id 0.
pub struct DataFile {
    file_id: u32,
    write_offset: u64,
    io: Box<dyn IoManager>,
    path: PathBuf,
}

impl DataFile {
    /// Opens (or creates) the numbered data file `file_id` in `dir`.
    pub fn open_data(dir: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::open_at(data_file_path(dir, file_id), file_id, kind)
    }

    /// Opens the hint file in `dir`.
    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_at(dir.join(HINT_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the merge-finish marker file in `dir`.
    pub fn open_merge_finish(dir: &Path) -> Result<Self> {
        Self::open_at(dir.join(MERGE_FINISH_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the sequence-number file in `dir`.
    pub fn open_sequence(dir: &Path) -> Result<Self> {
        Self::open_at(dir.join(SEQUENCE_FILE_NAME), 0, IoKind::Standard)
    }

    fn open_at(path: PathBuf, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = fio::open(&path, kind)?;
        Ok(Self {
            file_id,
            write_offset: 0,
            io,
            path,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Installs the append offset recovered by a log replay.
    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Appends encoded bytes and advances the write offset. Does not sync.
    pub fn append(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.append(buf)?;
        self.write_offset += n as u64;
        Ok(())
    }

    /// Durably flushes appended records.
    pub fn sync(&self) -> Result<()> {
        Ok(self.io.sync()?)
    }

    /// Rebinds the I/O back-end; only called at the engine open boundary
    /// after recovery finishes scanning through the mmap back-end.
    pub fn switch_io(&mut self, kind: IoKind) -> Result<()> {
        self.io = fio::open(&self.path, kind)?;
        Ok(())
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the record and its encoded size, or `None` at end of file
    /// (offset at or past the file end, or an all-zero header).
    ///
    /// # Errors
    ///
    /// [`LogFileError::ShortRead`] when the file ends mid-record,
    /// [`LogFileError::InvalidCrc`] on checksum mismatch. During replay both
    /// mean "truncate here"; on a foreground read they surface to the caller.
    ///
    /// [`LogFileError::ShortRead`]: crate::LogFileError::ShortRead
    /// [`LogFileError::InvalidCrc`]: crate::LogFileError::InvalidCrc
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u32)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // never read past EOF: the last record's header may be shorter than
        // the 25-byte maximum
        let header_cap = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_cap];
        let n = self.io.read_at(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let header = match decode_header(&header_buf) {
            Ok(h) => h,
            // too few bytes at the tail to even hold a header
            Err(crate::LogFileError::ShortRead) if header_buf.len() < MAX_HEADER_SIZE => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        if header.is_eof_marker() {
            return Ok(None);
        }
        if header.key_len < 0 || header.value_len < 0 {
            return Err(crate::LogFileError::ShortRead);
        }

        let payload_len = (header.key_len + header.value_len) as u64;
        let mut payload = vec![0u8; payload_len as usize];
        let n = self.io.read_at(&mut payload, offset + header.len as u64)?;
        if (n as u64) < payload_len {
            return Err(crate::LogFileError::ShortRead);
        }

        let record = assemble_record(&header, &header_buf[4..header.len], &payload)?;
        let encoded_size = header.len as u32 + payload_len as u32;
        Ok(Some((record, encoded_size)))
    }
}
