
use logfile::Position;

use crate::Indexer;

pub fn pos(file_id: u32, offset: u64) -> Position {
    Position {
        file_id,
        offset,
        size: 24,
    }
}

// Contract checks shared by all three variants.

pub fn check_put_get_delete(index: &dyn Indexer) {
    assert!(index.put(b"b".to_vec(), pos(1, 0)).unwrap().is_none());
    assert!(index.put(b"a".to_vec(), pos(1, 24)).unwrap().is_none());
    assert_eq!(index.get(b"a").unwrap(), Some(pos(1, 24)));
    assert_eq!(index.get(b"b").unwrap(), Some(pos(1, 0)));
    assert_eq!(index.get(b"missing").unwrap(), None);
    assert_eq!(index.size(), 2);

    // replace returns the previous position
    let old = index.put(b"a".to_vec(), pos(2, 0)).unwrap();
    assert_eq!(old, Some(pos(1, 24)));
    assert_eq!(index.size(), 2);

    // delete returns the previous position; absent keys change nothing
    assert_eq!(index.delete(b"a").unwrap(), Some(pos(2, 0)));
    assert_eq!(index.delete(b"a").unwrap(), None);
    assert_eq!(index.get(b"a").unwrap(), None);
    assert_eq!(index.size(), 1);
}

pub fn check_ordered_iteration(index: &dyn Indexer) {
    for key in [&b"banana"[..], b"apple", b"cherry", b"apricot"] {
        index.put(key.to_vec(), pos(1, 0)).unwrap();
    }

    let mut iter = index.iterator(false).unwrap();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"apple".to_vec(), b"apricot".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);

    let mut iter = index.iterator(true).unwrap();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"cherry".to_vec(), b"banana".to_vec(), b"apricot".to_vec(), b"apple".to_vec()]);
}

pub fn check_seek_semantics(index: &dyn Indexer) {
    for key in [&b"aa"[..], b"cc", b"ee"] {
        index.put(key.to_vec(), pos(1, 0)).unwrap();
    }

    // forward: first entry >= key
    let mut iter = index.iterator(false).unwrap();
    iter.seek(b"bb");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"cc");
    iter.seek(b"cc");
    assert_eq!(iter.key(), b"cc");
    iter.seek(b"ff");
    assert!(!iter.valid());

    // reverse: first entry <= key
    let mut iter = index.iterator(true).unwrap();
    iter.seek(b"dd");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"cc");
    iter.seek(b"a");
    assert!(!iter.valid());

    // rewind resets to the first entry of the direction
    let mut iter = index.iterator(true).unwrap();
    iter.seek(b"bb");
    iter.rewind();
    assert_eq!(iter.key(), b"ee");
}

pub fn check_snapshot_isolation(index: &dyn Indexer) {
    index.put(b"k1".to_vec(), pos(1, 0)).unwrap();
    let iter = index.iterator(false).unwrap();

    // mutations after creation must not be observed
    index.put(b"k2".to_vec(), pos(1, 24)).unwrap();
    index.delete(b"k1").unwrap();

    let mut iter = iter;
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(keys, vec![b"k1".to_vec()]);
}
