use super::record::{decode_header, put_uvarint, put_varint, uvarint, varint};
use super::*;
use tempfile::tempdir;

// -------------------- varints --------------------

#[test]
fn uvarint_roundtrip_at_boundaries() {
    for v in [
        0u64,
        1,
        127,
        128,
        16_383,
        16_384,
        u32::MAX as u64,
        u64::MAX - 1,
        u64::MAX,
    ] {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, v);
        let (got, n) = uvarint(&buf).unwrap();
        assert_eq!(got, v);
        assert_eq!(n, buf.len());
    }
}

#[test]
fn varint_roundtrip_signed() {
    for v in [0i64, 1, -1, 63, -64, 64, -65, i32::MAX as i64, i64::MIN] {
        let mut buf = Vec::new();
        put_varint(&mut buf, v);
        let (got, n) = varint(&buf).unwrap();
        assert_eq!(got, v);
        assert_eq!(n, buf.len());
    }
}

#[test]
fn uvarint_truncated_is_none() {
    let mut buf = Vec::new();
    put_uvarint(&mut buf, 300);
    assert!(uvarint(&buf[..1]).is_none());
    assert!(uvarint(&[]).is_none());
}

// -------------------- record codec --------------------

fn roundtrip(rec: &LogRecord) -> (LogRecord, u32) {
    let dir = tempdir().unwrap();
    let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
    df.append(&rec.encode()).unwrap();
    let (got, size) = df.read_record(0).unwrap().unwrap();
    (got, size)
}

#[test]
fn encode_decode_normal_record() {
    let rec = LogRecord::normal(b"name".to_vec(), b"alice".to_vec());
    let (got, size) = roundtrip(&rec);
    assert_eq!(got, rec);
    assert_eq!(size as usize, rec.encode().len());
}

#[test]
fn reencode_produces_identical_bytes() {
    let rec = LogRecord {
        key: vec![0x00, 0xff, 0x7f],
        value: vec![1, 2, 3, 4, 5],
        rec_type: RecordType::Normal,
        seq: 42,
    };
    let (got, _) = roundtrip(&rec);
    assert_eq!(got.encode(), rec.encode());
}

#[test]
fn empty_value_roundtrips() {
    let rec = LogRecord::normal(b"k".to_vec(), Vec::new());
    let (got, _) = roundtrip(&rec);
    assert_eq!(got.value, Vec::<u8>::new());
}

#[test]
fn tombstone_and_txn_finish_types_survive() {
    let tomb = LogRecord::tombstone(b"gone".to_vec());
    assert_eq!(roundtrip(&tomb).0.rec_type, RecordType::Tombstone);

    let fin = LogRecord {
        key: b"txn.finished".to_vec(),
        value: Vec::new(),
        rec_type: RecordType::TxnFinish,
        seq: 7,
    };
    assert_eq!(roundtrip(&fin).0.rec_type, RecordType::TxnFinish);
}

#[test]
fn large_sequence_number_roundtrips() {
    let rec = LogRecord {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
        rec_type: RecordType::Normal,
        seq: u64::MAX,
    };
    let (got, _) = roundtrip(&rec);
    assert_eq!(got.seq, u64::MAX);
}

#[test]
fn header_of_zeros_is_eof_marker() {
    let header = decode_header(&[0u8; MAX_HEADER_SIZE]).unwrap();
    assert!(header.is_eof_marker());
}

// -------------------- position codec --------------------

#[test]
fn position_roundtrip() {
    let pos = Position {
        file_id: 3,
        offset: 123_456_789,
        size: 4096,
    };
    let buf = encode_position(&pos);
    let (got, n) = decode_position(&buf).unwrap();
    assert_eq!(got, pos);
    assert_eq!(n, buf.len());
}

#[test]
fn position_extremes_roundtrip() {
    let pos = Position {
        file_id: u32::MAX,
        offset: u64::MAX,
        size: u32::MAX,
    };
    let (got, _) = decode_position(&encode_position(&pos)).unwrap();
    assert_eq!(got, pos);
}

#[test]
fn truncated_position_is_short_read() {
    let buf = encode_position(&Position {
        file_id: 1,
        offset: 1 << 40,
        size: 9,
    });
    assert!(matches!(
        decode_position(&buf[..buf.len() - 1]),
        Err(LogFileError::ShortRead)
    ));
}

// -------------------- data file --------------------

#[test]
fn data_file_name_is_zero_padded() {
    let dir = tempdir().unwrap();
    let path = data_file_path(dir.path(), 42);
    assert_eq!(path.file_name().unwrap(), "000000042.data");
}

#[test]
fn sequential_records_read_back_in_order() {
    let dir = tempdir().unwrap();
    let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();

    let recs = vec![
        LogRecord::normal(b"a".to_vec(), b"1".to_vec()),
        LogRecord::normal(b"b".to_vec(), b"22".to_vec()),
        LogRecord::tombstone(b"a".to_vec()),
    ];
    for rec in &recs {
        df.append(&rec.encode()).unwrap();
    }
    df.sync().unwrap();

    let mut offset = 0u64;
    let mut got = Vec::new();
    while let Some((rec, size)) = df.read_record(offset).unwrap() {
        got.push(rec);
        offset += u64::from(size);
    }
    assert_eq!(got, recs);
    assert_eq!(offset, df.write_offset());
}

#[test]
fn read_at_eof_returns_none() {
    let dir = tempdir().unwrap();
    let df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
    assert!(df.read_record(0).unwrap().is_none());
}

#[test]
fn corrupt_crc_is_detected() {
    let dir = tempdir().unwrap();
    let path = data_file_path(dir.path(), 1);
    {
        let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
        df.append(&LogRecord::normal(b"k".to_vec(), b"value".to_vec()).encode())
            .unwrap();
    }

    // flip the last value byte
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
    assert!(matches!(df.read_record(0), Err(LogFileError::InvalidCrc)));
}

#[test]
fn truncated_payload_is_short_read() {
    let dir = tempdir().unwrap();
    let path = data_file_path(dir.path(), 1);
    {
        let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
        df.append(
            &LogRecord::normal(b"key".to_vec(), vec![b'v'; 200]).encode(),
        )
        .unwrap();
    }

    // chop the record in the middle of its value
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 50]).unwrap();

    let df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
    assert!(matches!(df.read_record(0), Err(LogFileError::ShortRead)));
}

#[test]
fn trailing_zero_bytes_read_as_eof() {
    let dir = tempdir().unwrap();
    let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();

    let rec = LogRecord::normal(b"k".to_vec(), b"v".to_vec());
    df.append(&rec.encode()).unwrap();
    let end = df.write_offset();
    df.append(&vec![0u8; MAX_HEADER_SIZE]).unwrap();

    let (got, _) = df.read_record(0).unwrap().unwrap();
    assert_eq!(got, rec);
    assert!(df.read_record(end).unwrap().is_none());
}

#[test]
fn mmap_and_standard_backends_agree() {
    let dir = tempdir().unwrap();
    let rec = LogRecord::normal(b"shared".to_vec(), b"payload".to_vec());
    {
        let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
        df.append(&rec.encode()).unwrap();
        df.sync().unwrap();
    }

    let mapped = DataFile::open_data(dir.path(), 1, fio::IoKind::Mmap).unwrap();
    let (got, _) = mapped.read_record(0).unwrap().unwrap();
    assert_eq!(got, rec);
}

#[test]
fn switch_io_keeps_contents_readable() {
    let dir = tempdir().unwrap();
    let rec = LogRecord::normal(b"k".to_vec(), b"v".to_vec());
    {
        let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Standard).unwrap();
        df.append(&rec.encode()).unwrap();
        df.sync().unwrap();
    }

    let mut df = DataFile::open_data(dir.path(), 1, fio::IoKind::Mmap).unwrap();
    df.switch_io(fio::IoKind::Standard).unwrap();
    let (got, _) = df.read_record(0).unwrap().unwrap();
    assert_eq!(got, rec);
}

#[test]
fn special_files_use_record_framing() {
    let dir = tempdir().unwrap();

    let mut hint = DataFile::open_hint(dir.path()).unwrap();
    let pos = Position {
        file_id: 1,
        offset: 64,
        size: 32,
    };
    hint.append(&LogRecord::normal(b"user-key".to_vec(), encode_position(&pos)).encode())
        .unwrap();

    let hint = DataFile::open_hint(dir.path()).unwrap();
    let (rec, _) = hint.read_record(0).unwrap().unwrap();
    let (got, _) = decode_position(&rec.value).unwrap();
    assert_eq!(got, pos);
    assert!(dir.path().join(HINT_FILE_NAME).exists());
}
