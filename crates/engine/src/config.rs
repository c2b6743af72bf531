//! Engine, iterator and batch configuration.

use std::path::PathBuf;

pub use index::IndexKind;

use crate::{EngineError, Result};

/// Configuration handed to [`Engine::open`].
///
/// [`Engine::open`]: crate::Engine::open
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the data files; created if absent.
    pub dir_path: PathBuf,

    /// Rotation threshold: an append that would push the active file past
    /// this size seals it and opens the next one.
    pub data_file_size: u64,

    /// `fsync` after every single write.
    pub sync_writes: bool,

    /// `fsync` after this many bytes have been written since the last sync;
    /// `0` disables the byte-based policy.
    pub bytes_to_sync: u64,

    /// Which index implementation to use.
    pub index_kind: IndexKind,

    /// Scan existing files through a read-only memory map while rebuilding
    /// the index at open.
    pub mmap_at_open: bool,

    /// Fraction of dead bytes (reclaimable / total) that must accumulate
    /// before [`Engine::merge`] agrees to run. In `[0, 1]`.
    ///
    /// [`Engine::merge`]: crate::Engine::merge
    pub merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("firkin-data"),
            data_file_size: 64 * 1024 * 1024, // 64 MiB
            sync_writes: false,
            bytes_to_sync: 0,
            index_kind: IndexKind::BTree,
            mmap_at_open: true,
            merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Validates the configuration; called by `Engine::open`.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig("dir_path is empty".into()));
        }
        if self.data_file_size == 0 {
            return Err(EngineError::InvalidConfig(
                "data_file_size must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(EngineError::InvalidConfig(
                "merge_ratio must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`Engine::iterator`].
///
/// [`Engine::iterator`]: crate::Engine::iterator
#[derive(Debug, Clone, Default)]
pub struct IteratorConfig {
    /// Iterate in reverse lexicographic order.
    pub reverse: bool,

    /// Only yield keys starting with these bytes; empty means all keys.
    pub prefix: Vec<u8>,
}

/// Configuration for [`Engine::write_batch`].
///
/// [`Engine::write_batch`]: crate::Engine::write_batch
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of pending entries in one batch.
    pub max_batch_size: usize,

    /// `fsync` the active file once the whole batch (marker included) has
    /// been appended.
    pub sync_writes: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100_000,
            sync_writes: true,
        }
    }
}
