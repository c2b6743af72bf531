//! Merge (compaction) and its crash-safe rollforward.
//!
//! Merge rewrites the sealed files into a sibling `<dir>-merge` directory
//! keeping only records the live index still references, then publishes the
//! result with a `merge-finish` marker carrying the watermark (the first
//! file id *not* covered by the merge). The next open either swaps the
//! merged files in (marker present) or discards the directory (marker
//! absent, merge was interrupted).
//!
//! Foreground writes keep running while a merge is in flight: the prologue
//! rolls the active file under the write mutex, so every concurrent append
//! lands in a file with id >= watermark and can never be shadowed by merge
//! output.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::{info, warn};
use logfile::{
    data_file_path, DataFile, LogRecord, RecordType, MERGE_FINISH_FILE_NAME, SEQUENCE_FILE_NAME,
};

use crate::{
    Engine, EngineError, IndexKind, Result, INITIAL_FILE_ID, LOCK_FILE_NAME, NON_TXN_SEQ,
};

/// Suffix of the sibling working directory.
pub(crate) const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the merge-finish record. On disk only; never surfaced.
pub(crate) const MERGE_FINISH_KEY: &[u8] = b"merge.finished";

/// `<parent>/<dir_name>-merge`
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}{MERGE_DIR_SUFFIX}"))
}

impl Engine {
    /// Compacts the sealed data files, reclaiming space held by overwritten
    /// and deleted records.
    ///
    /// Preconditions, checked in order: an active file exists (no-op
    /// otherwise), no merge is running, there are bytes on disk (no-op
    /// otherwise), the reclaimable ratio reaches `merge_ratio`, and the
    /// device has room for the surviving data.
    ///
    /// # Errors
    ///
    /// [`EngineError::MergeInProgress`], [`EngineError::MergeRatioUnsatisfied`],
    /// [`EngineError::NotEnoughDiskSpace`], plus I/O errors from the rewrite.
    pub fn merge(&self) -> Result<()> {
        self.ensure_open()?;
        if self.active_file.read().is_none() {
            return Ok(());
        }
        let Some(_running) = self.merge_lock.try_lock() else {
            return Err(EngineError::MergeInProgress);
        };

        let stats = self.stats()?;
        if stats.disk_size == 0 {
            return Ok(());
        }
        let ratio = stats.reclaimable_bytes as f32 / stats.disk_size as f32;
        if ratio < self.config.merge_ratio {
            return Err(EngineError::MergeRatioUnsatisfied);
        }
        let need = stats.disk_size - stats.reclaimable_bytes.min(stats.disk_size);
        let available = fs2::available_space(&self.config.dir_path)?;
        if need > available {
            return Err(EngineError::NotEnoughDiskSpace { need, available });
        }

        // prologue, under the write mutex: seal the active file and open its
        // successor. Everything below the new id is frozen and mergeable;
        // everything the foreground writes from here on is not.
        let (watermark, mut merge_file_ids) = {
            let _guard = self.write_lock.lock();
            let mut active = self.active_file.write();
            let Some(sealed) = active.take() else {
                return Ok(());
            };
            sealed.sync()?;
            let next_id = sealed.file_id() + 1;
            let mut inactive = self.inactive_files.write();
            inactive.insert(sealed.file_id(), sealed);
            *active = Some(self.new_data_file(next_id)?);
            (next_id, inactive.keys().copied().collect::<Vec<u32>>())
        };
        merge_file_ids.sort_unstable();
        info!(
            "merge started: {} files below watermark {watermark}",
            merge_file_ids.len()
        );

        let merge_dir = merge_dir_path(&self.config.dir_path);
        if merge_dir.exists() {
            std::fs::remove_dir_all(&merge_dir)?;
        }
        std::fs::create_dir_all(&merge_dir)?;

        // a private engine writes the surviving records; with the in-memory
        // indexes its index is a throwaway and the hint file carries the
        // positions instead, with the B+ tree the rebuilt tree file itself
        // is what the swap ships
        let mut merge_config = self.config.clone();
        merge_config.dir_path = merge_dir.clone();
        merge_config.sync_writes = false;
        if merge_config.index_kind != IndexKind::BPlusTree {
            merge_config.index_kind = IndexKind::BTree;
        }
        let merge_engine = Engine::open(merge_config)?;

        let mut hint_file = if self.config.index_kind != IndexKind::BPlusTree {
            Some(DataFile::open_hint(&merge_dir)?)
        } else {
            None
        };

        let mut rewritten = 0usize;
        for &file_id in &merge_file_ids {
            let mut offset = 0u64;
            loop {
                // short-lived guard per record so rotation never waits on us
                let entry = {
                    let inactive = self.inactive_files.read();
                    let Some(file) = inactive.get(&file_id) else {
                        break;
                    };
                    file.read_record(offset)?
                };
                let Some((record, size)) = entry else {
                    break;
                };

                // live means the index still points at this exact record
                let live = matches!(
                    self.index.get(&record.key)?,
                    Some(p) if p.file_id == file_id && p.offset == offset
                );
                if live {
                    let new_pos = merge_engine.append_record(&record)?;
                    if merge_engine.config.index_kind == IndexKind::BPlusTree {
                        merge_engine.index.put(record.key.clone(), new_pos)?;
                    }
                    if let Some(hint) = hint_file.as_mut() {
                        let hint_record =
                            LogRecord::normal(record.key, logfile::encode_position(&new_pos));
                        hint.append(&hint_record.encode())?;
                    }
                    rewritten += 1;
                }

                offset += u64::from(size);
            }
        }

        if let Some(hint) = hint_file.as_mut() {
            hint.sync()?;
        }
        merge_engine.close()?;

        // the marker is the commit point of the whole merge
        let mut finish = DataFile::open_merge_finish(&merge_dir)?;
        let record = LogRecord {
            key: MERGE_FINISH_KEY.to_vec(),
            value: watermark.to_string().into_bytes(),
            rec_type: RecordType::Normal,
            seq: NON_TXN_SEQ,
        };
        finish.append(&record.encode())?;
        finish.sync()?;

        info!("merge finished: {rewritten} live records rewritten");
        Ok(())
    }
}

/// Consumes a pending merge directory at open: swaps a completed merge into
/// the data directory, or discards an interrupted one.
///
/// The swap is idempotent: if it fails partway the directory is left in
/// place and the next open resumes it (already-moved files are simply gone
/// from the merge directory by then).
pub(crate) fn rollforward(dir: &Path) -> Result<()> {
    let merge_dir = merge_dir_path(dir);
    if !merge_dir.exists() {
        return Ok(());
    }

    if !merge_dir.join(MERGE_FINISH_FILE_NAME).exists() {
        warn!("discarding interrupted merge directory {merge_dir:?}");
        std::fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }
    let watermark = read_watermark(&merge_dir)?.ok_or_else(|| {
        EngineError::DirectoryCorrupted("merge-finish file is unreadable".into())
    })?;

    // files fully covered by the merge output are replaced
    for file_id in INITIAL_FILE_ID..watermark {
        let path = data_file_path(dir, file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }

    // move the merge output in; the merge engine's own sequence file and
    // lock must not clobber the live ones
    let names: Vec<std::ffi::OsString> = std::fs::read_dir(&merge_dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()?;
    for name in names {
        if name == SEQUENCE_FILE_NAME || name == LOCK_FILE_NAME {
            continue;
        }
        std::fs::rename(merge_dir.join(&name), dir.join(&name))?;
    }

    std::fs::remove_dir_all(&merge_dir)?;
    info!("merge rolled forward at watermark {watermark}");
    Ok(())
}

/// Reads the watermark out of `dir`'s merge-finish file, if present.
pub(crate) fn read_watermark(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISH_FILE_NAME).exists() {
        return Ok(None);
    }
    let file = DataFile::open_merge_finish(dir)?;
    let (record, _) = file.read_record(0)?.ok_or_else(|| {
        EngineError::DirectoryCorrupted("empty merge-finish file".into())
    })?;
    let text = std::str::from_utf8(&record.value)
        .map_err(|_| EngineError::DirectoryCorrupted("merge-finish is not ASCII".into()))?;
    let watermark = text
        .parse::<u32>()
        .map_err(|_| EngineError::DirectoryCorrupted("merge-finish watermark unparseable".into()))?;
    Ok(Some(watermark))
}
