use super::*;
use tempfile::tempdir;

// -------------------- FileIo --------------------

#[test]
fn append_then_read_at() {
    let dir = tempdir().unwrap();
    let io = FileIo::open(&dir.path().join("a.data")).unwrap();

    assert_eq!(io.append(b"hello ").unwrap(), 6);
    assert_eq!(io.append(b"world").unwrap(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(io.read_at(&mut buf, 6).unwrap(), 5);
    assert_eq!(&buf, b"world");
    assert_eq!(io.size().unwrap(), 11);
}

#[test]
fn read_past_eof_is_short() {
    let dir = tempdir().unwrap();
    let io = FileIo::open(&dir.path().join("a.data")).unwrap();
    io.append(b"abc").unwrap();

    let mut buf = [0u8; 8];
    let n = io.read_at(&mut buf, 1).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..n], b"bc");
}

#[test]
fn reopen_appends_at_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");

    {
        let io = FileIo::open(&path).unwrap();
        io.append(b"one").unwrap();
        io.sync().unwrap();
    }
    let io = FileIo::open(&path).unwrap();
    io.append(b"two").unwrap();

    let mut buf = [0u8; 6];
    assert_eq!(io.read_at(&mut buf, 0).unwrap(), 6);
    assert_eq!(&buf, b"onetwo");
}

#[test]
fn sync_flushes() {
    let dir = tempdir().unwrap();
    let io = FileIo::open(&dir.path().join("a.data")).unwrap();
    io.append(b"durable").unwrap();
    io.sync().unwrap();
    assert_eq!(io.size().unwrap(), 7);
}

// -------------------- MmapIo --------------------

#[test]
fn mmap_reads_existing_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");
    {
        let io = FileIo::open(&path).unwrap();
        io.append(b"mapped bytes").unwrap();
        io.sync().unwrap();
    }

    let io = MmapIo::open(&path).unwrap();
    assert_eq!(io.size().unwrap(), 12);

    let mut buf = [0u8; 5];
    assert_eq!(io.read_at(&mut buf, 7).unwrap(), 5);
    assert_eq!(&buf, b"bytes");
}

#[test]
fn mmap_empty_file_reads_zero() {
    let dir = tempdir().unwrap();
    let io = MmapIo::open(&dir.path().join("empty.data")).unwrap();
    assert_eq!(io.size().unwrap(), 0);

    let mut buf = [0u8; 4];
    assert_eq!(io.read_at(&mut buf, 0).unwrap(), 0);
}

#[test]
fn mmap_rejects_writes() {
    let dir = tempdir().unwrap();
    let io = MmapIo::open(&dir.path().join("a.data")).unwrap();

    let err = io.append(b"nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(io.sync().unwrap_err().kind(), ErrorKind::Unsupported);
}

#[test]
fn open_selects_backend() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");

    let std_io = open(&path, IoKind::Standard).unwrap();
    std_io.append(b"x").unwrap();
    std_io.sync().unwrap();

    let map_io = open(&path, IoKind::Mmap).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(map_io.read_at(&mut buf, 0).unwrap(), 1);
    assert_eq!(&buf, b"x");
}
