//! Record and position codecs.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;

use crate::{LogFileError, Result};

/// Maximum encoded header size: crc (4) + type (1) + seq uvarint (10) +
/// key_len varint (5) + value_len varint (5).
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 10 + 5 + 5;

const CRC_SIZE: usize = 4;

/// What a record means to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 0,
    /// Marks its key as deleted.
    Tombstone = 1,
    /// Terminates a transaction; the commit point for its sequence number.
    TxnFinish = 2,
}

impl RecordType {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Tombstone),
            2 => Ok(RecordType::TxnFinish),
            other => Err(LogFileError::UnknownRecordType(other)),
        }
    }
}

/// One durable unit in a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
    /// Transaction sequence number; `0` means non-transactional.
    pub seq: u64,
}

impl LogRecord {
    /// A non-transactional live record.
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: RecordType::Normal,
            seq: 0,
        }
    }

    /// A non-transactional tombstone.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: RecordType::Tombstone,
            seq: 0,
        }
    }

    /// Serialises the record into the on-disk frame.
    ///
    /// The returned buffer length is the record's encoded size.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.rec_type as u8);
        put_uvarint(&mut buf, self.seq);
        put_varint(&mut buf, self.key.len() as i64);
        put_varint(&mut buf, self.value.len() as i64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf[CRC_SIZE..]);
        let crc = hasher.finalize();
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}

/// Decoded header fields plus the header's encoded length.
pub(crate) struct Header {
    pub crc: u32,
    pub raw_type: u8,
    pub seq: u64,
    pub key_len: i64,
    pub value_len: i64,
    pub len: usize,
}

impl Header {
    /// The all-zero terminator: trailing zero bytes decode to this and mean
    /// end-of-file.
    pub fn is_eof_marker(&self) -> bool {
        self.crc == 0 && self.seq == 0 && self.key_len == 0 && self.value_len == 0
    }
}

/// Parses a header from `buf`, which holds at most [`MAX_HEADER_SIZE`] bytes
/// (fewer near end of file). `ShortRead` means the buffer ended mid-header.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Header> {
    if buf.len() <= CRC_SIZE {
        return Err(LogFileError::ShortRead);
    }
    let crc = LittleEndian::read_u32(&buf[..CRC_SIZE]);
    let raw_type = buf[CRC_SIZE];

    let mut at = CRC_SIZE + 1;
    let (seq, n) = uvarint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;
    let (key_len, n) = varint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;
    let (value_len, n) = varint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;

    Ok(Header {
        crc,
        raw_type,
        seq,
        key_len,
        value_len,
        len: at,
    })
}

/// Reassembles a record from its decoded header, the raw header bytes past
/// the CRC, and the key+value payload; verifies the checksum.
pub(crate) fn assemble_record(
    header: &Header,
    header_tail: &[u8],
    payload: &[u8],
) -> Result<LogRecord> {
    if header.key_len < 0 || header.value_len < 0 {
        return Err(LogFileError::ShortRead);
    }
    let rec_type = RecordType::from_u8(header.raw_type)?;
    let key_len = header.key_len as usize;

    let mut hasher = Crc32::new();
    hasher.update(header_tail);
    hasher.update(payload);
    if hasher.finalize() != header.crc {
        return Err(LogFileError::InvalidCrc);
    }

    Ok(LogRecord {
        key: payload[..key_len].to_vec(),
        value: payload[key_len..].to_vec(),
        rec_type,
        seq: header.seq,
    })
}

/// Byte position of one record in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: u64,
    /// Encoded size of the record, so dead bytes can be accounted without
    /// re-reading it.
    pub size: u32,
}

/// Serialises a position descriptor (`uvarint` fid, offset, size).
pub fn encode_position(pos: &Position) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    put_uvarint(&mut buf, pos.file_id as u64);
    put_uvarint(&mut buf, pos.offset);
    put_uvarint(&mut buf, pos.size as u64);
    buf
}

/// Parses a position descriptor, returning it and the bytes consumed.
pub fn decode_position(buf: &[u8]) -> Result<(Position, usize)> {
    let mut at = 0;
    let (file_id, n) = uvarint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;
    let (offset, n) = uvarint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;
    let (size, n) = uvarint(&buf[at..]).ok_or(LogFileError::ShortRead)?;
    at += n;
    Ok((
        Position {
            file_id: file_id as u32,
            offset,
            size: size as u32,
        },
        at,
    ))
}

// -------------------- varints --------------------
//
// LEB128, the layout Go's encoding/binary uses: unsigned as base-128 with a
// continuation bit, signed via zigzag on top of unsigned.

pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Returns the decoded value and bytes consumed, or `None` if `buf` ends
/// before the terminating byte.
pub(crate) fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

pub(crate) fn put_varint(buf: &mut Vec<u8>, v: i64) {
    // zigzag: interleave negatives so small magnitudes stay short
    put_uvarint(buf, ((v << 1) ^ (v >> 63)) as u64);
}

pub(crate) fn varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (u, n) = uvarint(buf)?;
    Some((((u >> 1) as i64) ^ -((u & 1) as i64), n))
}
