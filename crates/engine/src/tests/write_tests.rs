use tempfile::tempdir;

use super::helpers::*;
use crate::{EngineError, Result};

// -------------------- basic put / get / delete --------------------

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    assert_eq!(engine.get(b"a")?, b"1".to_vec());

    engine.put(b"a".to_vec(), b"2".to_vec())?;
    assert_eq!(engine.get(b"a")?, b"2".to_vec());
    Ok(())
}

#[test]
fn put_rejects_empty_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    assert!(matches!(
        engine.put(Vec::new(), b"v".to_vec()),
        Err(EngineError::KeyEmpty)
    ));
    Ok(())
}

#[test]
fn empty_value_roundtrips_as_empty() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    engine.put(b"k".to_vec(), Vec::new())?;
    assert_eq!(engine.get(b"k")?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn delete_makes_key_not_found() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;

    engine.put(b"b".to_vec(), b"x".to_vec())?;
    engine.delete(b"b".to_vec())?;
    assert!(matches!(engine.get(b"b"), Err(EngineError::KeyNotFound)));

    // resurrect
    engine.put(b"b".to_vec(), b"y".to_vec())?;
    assert_eq!(engine.get(b"b")?, b"y".to_vec());
    Ok(())
}

#[test]
fn delete_of_absent_key_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    engine.delete(b"ghost".to_vec())?;
    assert_eq!(engine.stats()?.key_count, 0);
    Ok(())
}

#[test]
fn delete_rejects_empty_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    assert!(matches!(
        engine.delete(Vec::new()),
        Err(EngineError::KeyEmpty)
    ));
    Ok(())
}

// -------------------- rotation --------------------

#[test]
fn rotation_produces_expected_file_count() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.data_file_size = 64 * 1024;
    let engine = crate::Engine::open(config)?;

    // ~150 encoded bytes per record; 1000 of them span three 64 KiB files
    for i in 0..1000u32 {
        engine.put(key(i), vec![b'v'; 128])?;
    }
    assert_eq!(count_data_files(dir.path()), 3);
    assert_eq!(engine.stats()?.data_file_count, 3);

    // every key is still readable across all files
    assert_eq!(engine.get(&key(1))?, vec![b'v'; 128]);
    assert_eq!(engine.get(&key(999))?, vec![b'v'; 128]);
    Ok(())
}

#[test]
fn appends_never_shrink_files() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.data_file_size = 4 * 1024;
    let engine = crate::Engine::open(config)?;

    let mut last_total = 0u64;
    for i in 0..200u32 {
        engine.put(key(i), value(i))?;
        let total = engine.stats()?.disk_size;
        assert!(total >= last_total, "disk size shrank on append");
        last_total = total;
    }
    Ok(())
}

// -------------------- sync policies --------------------

#[test]
fn sync_writes_survive_without_close() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.sync_writes = true;
    let engine = crate::Engine::open(config)?;
    engine.put(b"durable".to_vec(), b"yes".to_vec())?;
    engine.close()?;
    drop(engine);

    let engine = open_engine(dir.path())?;
    assert_eq!(engine.get(b"durable")?, b"yes".to_vec());
    Ok(())
}

#[test]
fn bytes_to_sync_threshold_syncs() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.bytes_to_sync = 256;
    let engine = crate::Engine::open(config)?;
    for i in 0..50u32 {
        engine.put(key(i), value(i))?;
    }
    assert_eq!(engine.get(&key(49))?, value(49));
    Ok(())
}

#[test]
fn explicit_sync_succeeds() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.sync()?;
    Ok(())
}

// -------------------- stats and reclaim accounting --------------------

#[test]
fn stats_disk_size_matches_filesystem() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    for i in 0..100u32 {
        engine.put(key(i), value(i))?;
    }

    let stats = engine.stats()?;
    let mut on_disk = 0u64;
    for entry in std::fs::read_dir(dir.path())? {
        on_disk += entry?.metadata()?.len();
    }
    assert_eq!(stats.disk_size, on_disk);
    assert_eq!(stats.key_count, 100);
    Ok(())
}

#[test]
fn overwrites_and_deletes_feed_reclaimable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;

    assert_eq!(engine.stats()?.reclaimable_bytes, 0);

    engine.put(b"k".to_vec(), b"first".to_vec())?;
    assert_eq!(engine.stats()?.reclaimable_bytes, 0);

    // overwrite kills the first record
    let first_size = engine.stats()?.disk_size;
    engine.put(b"k".to_vec(), b"second".to_vec())?;
    assert_eq!(engine.stats()?.reclaimable_bytes, first_size);

    // delete kills the second record and its own tombstone
    let before = engine.stats()?.disk_size;
    engine.delete(b"k".to_vec())?;
    let after = engine.stats()?.disk_size;
    let second_size = before - first_size;
    let tombstone_size = after - before;
    assert_eq!(
        engine.stats()?.reclaimable_bytes,
        first_size + second_size + tombstone_size
    );
    Ok(())
}

// -------------------- closed engine --------------------

#[test]
fn operations_fail_after_close() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.close()?;

    assert!(matches!(
        engine.put(b"k".to_vec(), b"v".to_vec()),
        Err(EngineError::EngineClosed)
    ));
    assert!(matches!(engine.get(b"k"), Err(EngineError::EngineClosed)));
    assert!(matches!(
        engine.delete(b"k".to_vec()),
        Err(EngineError::EngineClosed)
    ));
    assert!(matches!(engine.stats(), Err(EngineError::EngineClosed)));
    assert!(matches!(engine.merge(), Err(EngineError::EngineClosed)));
    Ok(())
}

// -------------------- config validation --------------------

#[test]
fn invalid_configs_are_rejected() {
    let dir = tempdir().unwrap();

    let mut config = test_config(dir.path());
    config.data_file_size = 0;
    assert!(matches!(
        crate::Engine::open(config),
        Err(EngineError::InvalidConfig(_))
    ));

    let mut config = test_config(dir.path());
    config.merge_ratio = 1.5;
    assert!(matches!(
        crate::Engine::open(config),
        Err(EngineError::InvalidConfig(_))
    ));

    let mut config = test_config(dir.path());
    config.dir_path = std::path::PathBuf::new();
    assert!(matches!(
        crate::Engine::open(config),
        Err(EngineError::InvalidConfig(_))
    ));
}
