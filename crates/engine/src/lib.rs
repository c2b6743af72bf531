//! # engine — the FirkinKV storage engine
//!
//! A Bitcask-model store: every mutation is appended to a numbered log file,
//! and an in-memory index maps each live key to the byte position of its
//! newest record. Reads are one index lookup plus one positioned read.
//!
//! ```text
//! write:  Put/Delete ──► append to active .data file ──► index update
//! read:   Get ──► index lookup ──► read_at(position) ──► value
//! ```
//!
//! ## Module responsibilities
//!
//! | Module | Purpose |
//! |--------------|--------------------------------------------------------|
//! | `lib.rs`     | `Engine` struct, open/close/sync/stats/backup, `Drop`  |
//! | [`write`]    | `put()`, `delete()`, the append + rotation protocol    |
//! | [`read`]     | `get()`, `list_keys()`, `fold()`, positioned reads     |
//! | [`recovery`] | data-file loading, hint file, log replay               |
//! | [`batch`]    | atomic multi-key write batches                         |
//! | [`merge`]    | compaction into a sibling directory + rollforward swap |
//! | [`iterator`] | ordered snapshot scans with prefix filtering           |
//!
//! ## Crash safety
//!
//! Records are CRC-framed; replay stops at the first torn record, which
//! implicitly truncates a partial tail write. A write batch becomes visible
//! to recovery only once its finish marker is on disk, so a crash mid-commit
//! rolls the whole batch back. A merge publishes its output with a
//! `merge-finish` marker; the swap into the live directory happens on the
//! next open and is skipped entirely (directory discarded) when the marker
//! is missing.

mod batch;
mod config;
mod error;
mod fsutil;
mod iterator;
mod merge;
mod read;
mod recovery;
mod write;

pub use batch::WriteBatch;
pub use config::{BatchConfig, Config, IndexKind, IteratorConfig};
pub use error::{EngineError, Result};
pub use iterator::EngineIterator;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fs2::FileExt;
use log::{error, info};
use logfile::DataFile;
use parking_lot::{Mutex, RwLock};

/// Name of the process lock file inside the data directory.
pub const LOCK_FILE_NAME: &str = "flock";

/// The first active file of a fresh directory.
pub(crate) const INITIAL_FILE_ID: u32 = 1;

/// Sequence number of non-transactional records.
pub(crate) const NON_TXN_SEQ: u64 = 0;

/// Key of the record persisting the sequence counter. On disk only; never
/// surfaced through the index.
pub(crate) const SEQUENCE_KEY: &[u8] = b"seq.counter";

/// Counters reported by [`Engine::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Live keys in the index.
    pub key_count: usize,
    /// Open data files (active plus inactive).
    pub data_file_count: usize,
    /// Encoded bytes of dead records, the input to the merge-ratio check.
    pub reclaimable_bytes: u64,
    /// Total bytes on disk under the data directory.
    pub disk_size: u64,
}

/// The storage engine. All public operations take `&self` and are safe to
/// call from multiple threads.
pub struct Engine {
    pub(crate) config: Config,

    /// Serialises every operation that advances the active file's write
    /// offset or moves files between active and inactive (put, delete, batch
    /// commit, the merge prologue, close).
    pub(crate) write_lock: Mutex<()>,

    /// `fold` and `backup` hold this shared; `close` holds it exclusively.
    /// Appends do not touch it: files are append-only and positions handed
    /// out stay valid.
    pub(crate) scan_lock: RwLock<()>,

    /// The file currently receiving appends; `None` until the first write of
    /// a fresh directory.
    pub(crate) active_file: RwLock<Option<DataFile>>,

    /// Sealed, read-only files by id.
    pub(crate) inactive_files: RwLock<HashMap<u32, DataFile>>,

    pub(crate) index: Box<dyn index::Indexer>,

    /// Transaction counter; batch commits tag their records with
    /// `fetch_add(1) + 1`.
    pub(crate) seq_no: AtomicU64,

    /// Encoded bytes of records no longer referenced by the index.
    pub(crate) reclaimable: AtomicU64,

    /// Bytes appended since the last sync, for the `bytes_to_sync` policy.
    pub(crate) bytes_since_sync: AtomicU64,

    /// Held for the duration of a merge; `try_lock` failure means one is
    /// already running.
    pub(crate) merge_lock: Mutex<()>,

    lock_file: File,
    open_flag: AtomicBool,

    /// The directory had no data files at open (first ever use).
    pub(crate) is_initial: bool,

    /// A `sequence-number` file was present at open.
    pub(crate) seq_file_exists: bool,
}

impl Engine {
    /// Opens the engine rooted at `config.dir_path`.
    ///
    /// Creates the directory if needed, takes the exclusive directory lock,
    /// rolls a finished merge forward, loads all data files, rebuilds the
    /// index, then switches file I/O back to the buffered back-end.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for bad settings,
    /// [`EngineError::FileLocked`] when another engine has the directory,
    /// [`EngineError::DirectoryCorrupted`] for unparseable file names, plus
    /// any I/O or index error from recovery.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir_path)?;

        let lock_file = acquire_dir_lock(&config.dir_path)?;
        merge::rollforward(&config.dir_path)?;

        let seq_file_exists = config.dir_path.join(logfile::SEQUENCE_FILE_NAME).exists();
        let index = index::open_index(config.index_kind, &config.dir_path, config.sync_writes)?;
        let (active, inactive, file_ids) = recovery::load_data_files(&config)?;

        let engine = Engine {
            write_lock: Mutex::new(()),
            scan_lock: RwLock::new(()),
            active_file: RwLock::new(active),
            inactive_files: RwLock::new(inactive),
            index,
            seq_no: AtomicU64::new(NON_TXN_SEQ),
            reclaimable: AtomicU64::new(0),
            bytes_since_sync: AtomicU64::new(0),
            merge_lock: Mutex::new(()),
            lock_file,
            open_flag: AtomicBool::new(false),
            is_initial: file_ids.is_empty(),
            seq_file_exists,
            config,
        };

        engine.rebuild_index(&file_ids)?;

        if engine.config.mmap_at_open {
            engine.switch_io_to_standard()?;
        }

        engine.open_flag.store(true, Ordering::Release);
        info!(
            "engine opened at {:?}: {} data files, {} live keys",
            engine.config.dir_path,
            file_ids.len(),
            engine.index.size()
        );
        Ok(engine)
    }

    /// Durably flushes the active file.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock();
        if let Some(active) = self.active_file.read().as_ref() {
            active.sync()?;
        }
        Ok(())
    }

    /// Current engine counters.
    pub fn stats(&self) -> Result<Stats> {
        self.ensure_open()?;
        let data_file_count =
            self.inactive_files.read().len() + usize::from(self.active_file.read().is_some());
        Ok(Stats {
            key_count: self.index.size(),
            data_file_count,
            reclaimable_bytes: self.reclaimable.load(Ordering::Acquire),
            disk_size: fsutil::dir_size(&self.config.dir_path)?,
        })
    }

    /// Copies the data directory into `target`, excluding the lock file.
    /// Runs under the shared scan lock; appends may continue meanwhile.
    pub fn backup(&self, target: &Path) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.scan_lock.read();
        fsutil::copy_dir(&self.config.dir_path, target, &[LOCK_FILE_NAME])?;
        Ok(())
    }

    /// Closes the engine: persists the sequence counter (on-disk B+ tree
    /// index only), syncs and drops every file, closes the index and releases
    /// the directory lock. Subsequent operations fail with
    /// [`EngineError::EngineClosed`].
    pub fn close(&self) -> Result<()> {
        if !self.open_flag.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let _scan = self.scan_lock.write();
        let _guard = self.write_lock.lock();

        if self.config.index_kind == IndexKind::BPlusTree {
            self.write_sequence_file()?;
        }
        if let Some(active) = self.active_file.write().take() {
            active.sync()?;
        }
        self.inactive_files.write().clear();
        self.index.close()?;
        self.lock_file.unlock()?;
        info!("engine closed at {:?}", self.config.dir_path);
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.open_flag.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::EngineClosed)
        }
    }

    /// Rewrites the `sequence-number` file with the current counter.
    fn write_sequence_file(&self) -> Result<()> {
        let path = self.config.dir_path.join(logfile::SEQUENCE_FILE_NAME);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let mut file = DataFile::open_sequence(&self.config.dir_path)?;
        let record = logfile::LogRecord {
            key: SEQUENCE_KEY.to_vec(),
            value: Vec::new(),
            rec_type: logfile::RecordType::Normal,
            seq: self.seq_no.load(Ordering::Acquire),
        };
        file.append(&record.encode())?;
        file.sync()?;
        Ok(())
    }
}

impl Drop for Engine {
    /// Best-effort close. Closing does I/O and can fail; `Drop` cannot
    /// propagate, so the error is logged — callers that care run
    /// [`Engine::close`] themselves.
    fn drop(&mut self) {
        if self.open_flag.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                error!("close on drop failed: {e}");
            }
        }
    }
}

/// Takes the exclusive `flock` inside `dir`; a second engine (same process
/// or not) fails fast with [`EngineError::FileLocked`].
fn acquire_dir_lock(dir: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(dir.join(LOCK_FILE_NAME))?;
    file.try_lock_exclusive()
        .map_err(|_| EngineError::FileLocked)?;
    Ok(file)
}

#[cfg(test)]
mod tests;
