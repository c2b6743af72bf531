//! # logfile — record framing and data files
//!
//! The durable unit of the store is a [`LogRecord`], appended to numbered
//! `.data` files and addressed by a [`Position`].
//!
//! ## Binary record format
//!
//! ```text
//! [crc32: u32 LE][type: u8][seq: uvarint][key_len: varint][value_len: varint][key][value]
//! ```
//!
//! * `crc32` covers every byte after itself through the end of the value.
//! * `seq` is an unsigned varint; `0` marks a non-transactional record.
//! * `key_len`/`value_len` are zigzag varints (at most 5 bytes each), so the
//!   header never exceeds [`MAX_HEADER_SIZE`] = 4 + 1 + 10 + 5 + 5 = 25 bytes.
//! * A decoded header that is all zeros (crc, seq, key_len, value_len) is the
//!   end-of-file terminator: recovery stops there cleanly.
//!
//! ## Position descriptor
//!
//! ```text
//! [file_id: uvarint][offset: uvarint][size: uvarint]
//! ```
//!
//! Hint files and the on-disk B+ tree index store positions in this form.

mod datafile;
mod record;

pub use datafile::{
    data_file_path, DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISH_FILE_NAME,
    SEQUENCE_FILE_NAME,
};
pub use record::{
    decode_position, encode_position, LogRecord, Position, RecordType, MAX_HEADER_SIZE,
};

use thiserror::Error;

/// Errors surfaced by record decoding and data-file I/O.
#[derive(Debug, Error)]
pub enum LogFileError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored CRC disagrees with the recomputed one.
    #[error("invalid crc, log record may be corrupted")]
    InvalidCrc,

    /// The file ended in the middle of a record.
    #[error("short read, log record is truncated")]
    ShortRead,

    /// The type byte does not name a known record type.
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
}

/// A logfile Result.
pub type Result<T> = std::result::Result<T, LogFileError>;

#[cfg(test)]
mod tests;
