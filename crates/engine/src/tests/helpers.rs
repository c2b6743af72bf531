use std::fs;
use std::path::Path;

use crate::{Config, Engine, IndexKind, Result};

/// Test configuration: small files, no mmap, merge always allowed.
pub fn test_config(dir: &Path) -> Config {
    Config {
        dir_path: dir.to_path_buf(),
        data_file_size: 1024 * 1024,
        sync_writes: false,
        bytes_to_sync: 0,
        index_kind: IndexKind::BTree,
        mmap_at_open: false,
        merge_ratio: 0.0,
    }
}

pub fn open_engine(dir: &Path) -> Result<Engine> {
    Engine::open(test_config(dir))
}

pub fn open_engine_with(dir: &Path, kind: IndexKind) -> Result<Engine> {
    let mut config = test_config(dir);
    config.index_kind = kind;
    Engine::open(config)
}

pub fn count_data_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "data")
                .unwrap_or(false)
        })
        .count()
}

pub fn key(i: u32) -> Vec<u8> {
    format!("key-{:09}", i).into_bytes()
}

pub fn value(i: u32) -> Vec<u8> {
    format!("value-{:09}", i).into_bytes()
}
