use tempfile::tempdir;

use super::helpers::*;
use crate::{EngineError, Result};

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    assert!(matches!(engine.get(b"nope"), Err(EngineError::KeyNotFound)));
    Ok(())
}

#[test]
fn get_rejects_empty_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    assert!(matches!(engine.get(b""), Err(EngineError::KeyEmpty)));
    Ok(())
}

#[test]
fn get_reads_across_sealed_files() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.data_file_size = 8 * 1024;
    let engine = crate::Engine::open(config)?;

    for i in 0..500u32 {
        engine.put(key(i), value(i))?;
    }
    assert!(engine.stats()?.data_file_count > 1);

    // early keys live in sealed files, late keys in the active one
    assert_eq!(engine.get(&key(0))?, value(0));
    assert_eq!(engine.get(&key(250))?, value(250));
    assert_eq!(engine.get(&key(499))?, value(499));
    Ok(())
}

#[test]
fn list_keys_is_sorted_snapshot() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;

    for i in [3u32, 1, 2] {
        engine.put(key(i), value(i))?;
    }
    let keys = engine.list_keys()?;
    assert_eq!(keys, vec![key(1), key(2), key(3)]);
    Ok(())
}

#[test]
fn fold_visits_pairs_in_order() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    for i in 0..10u32 {
        engine.put(key(i), value(i))?;
    }

    let mut seen = Vec::new();
    engine.fold(|k, v| {
        seen.push((k.to_vec(), v));
        true
    })?;
    assert_eq!(seen.len(), 10);
    assert_eq!(seen[0], (key(0), value(0)));
    assert_eq!(seen[9], (key(9), value(9)));
    Ok(())
}

#[test]
fn fold_stops_when_callback_returns_false() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    for i in 0..10u32 {
        engine.put(key(i), value(i))?;
    }

    let mut count = 0;
    engine.fold(|_, _| {
        count += 1;
        count < 3
    })?;
    assert_eq!(count, 3);
    Ok(())
}

#[test]
fn deleted_keys_are_invisible_to_scans() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path())?;
    for i in 0..5u32 {
        engine.put(key(i), value(i))?;
    }
    engine.delete(key(2))?;

    assert_eq!(engine.list_keys()?.len(), 4);
    let mut seen = Vec::new();
    engine.fold(|k, _| {
        seen.push(k.to_vec());
        true
    })?;
    assert!(!seen.contains(&key(2)));
    Ok(())
}

#[test]
fn backup_is_openable_copy() -> Result<()> {
    let dir = tempdir()?;
    let backup_dir = tempdir()?;
    let target = backup_dir.path().join("copy");

    let engine = open_engine(dir.path())?;
    for i in 0..50u32 {
        engine.put(key(i), value(i))?;
    }
    engine.backup(&target)?;

    // the lock file is excluded so the copy opens immediately
    assert!(!target.join(crate::LOCK_FILE_NAME).exists());
    let restored = open_engine(&target)?;
    assert_eq!(restored.stats()?.key_count, 50);
    assert_eq!(restored.get(&key(17))?, value(17));
    Ok(())
}
