//! Cold-start recovery: data-file loading, hint-file fast path, log replay.
//!
//! After recovery, Get/Put/Delete behave as if the engine had never stopped:
//! the index holds exactly one position per live key, the active file's write
//! offset points past its last intact record, and the sequence counter is at
//! the highest value the log has seen. Transactions whose finish marker never
//! made it to disk are discarded wholesale.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use fio::IoKind;
use log::{debug, warn};
use logfile::{DataFile, LogFileError, LogRecord, Position, RecordType, DATA_FILE_SUFFIX};

use crate::merge::read_watermark;
use crate::{Config, Engine, EngineError, IndexKind, Result, NON_TXN_SEQ};

/// Opens every `*.data` file in the directory, sorted by id. The largest id
/// becomes the active file; the rest are inactive. Returns the sorted id
/// list for replay.
pub(crate) fn load_data_files(
    config: &Config,
) -> Result<(Option<DataFile>, HashMap<u32, DataFile>, Vec<u32>)> {
    let mut file_ids = Vec::new();
    for entry in std::fs::read_dir(&config.dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id: u32 = stem
                .parse()
                .map_err(|_| EngineError::DirectoryCorrupted(format!("bad data file name {name}")))?;
            file_ids.push(id);
        }
    }
    file_ids.sort_unstable();

    let kind = if config.mmap_at_open {
        IoKind::Mmap
    } else {
        IoKind::Standard
    };

    let mut active = None;
    let mut inactive = HashMap::new();
    for (i, &id) in file_ids.iter().enumerate() {
        let file = DataFile::open_data(&config.dir_path, id, kind)?;
        if i == file_ids.len() - 1 {
            active = Some(file);
        } else {
            inactive.insert(id, file);
        }
    }
    Ok((active, inactive, file_ids))
}

impl Engine {
    /// Rebuilds the index from hint file and log, honouring the merge
    /// watermark; dispatches on the index kind per the recovery procedure.
    pub(crate) fn rebuild_index(&self, file_ids: &[u32]) -> Result<()> {
        let watermark = read_watermark(&self.config.dir_path)?;

        if self.config.index_kind == IndexKind::BPlusTree {
            // the tree file already holds the mapping; only the counter and
            // the active offset need recovering
            self.load_sequence_file()?;
            if let Some(active) = self.active_file.write().as_mut() {
                let size = active.size()?;
                active.set_write_offset(size);
            }
            // after a merge swap the tree only covers merged files; records
            // in files at or past the watermark were indexed by the tree the
            // swap replaced, so replay that suffix. The tree already holds
            // newer state for some of these keys, so reclaim attribution
            // would be wrong here — skip it
            if let Some(watermark) = watermark {
                self.replay_log(file_ids, watermark, false)?;
            }
            return Ok(());
        }

        self.load_hint_file()?;
        self.replay_log(file_ids, watermark.unwrap_or(0), true)?;
        Ok(())
    }

    /// Loads `(key, position)` pairs from the hint file, if one exists.
    /// Hint records carry no user values, so nothing feeds the reclaim
    /// counter here.
    pub(crate) fn load_hint_file(&self) -> Result<()> {
        let path = self.config.dir_path.join(logfile::HINT_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let hint = DataFile::open_hint(&self.config.dir_path)?;
        let mut offset = 0u64;
        let mut loaded = 0usize;
        while let Some((record, size)) = hint.read_record(offset)? {
            let (pos, _) = logfile::decode_position(&record.value)?;
            self.index.put(record.key, pos)?;
            loaded += 1;
            offset += u64::from(size);
        }
        debug!("hint file loaded: {loaded} positions");
        Ok(())
    }

    /// Replays data files with id >= `watermark` into the index, buffering
    /// transactional records until their finish marker shows up. With
    /// `account_reclaim`, displaced positions feed the reclaim counter
    /// (only meaningful when the index started empty).
    pub(crate) fn replay_log(
        &self,
        file_ids: &[u32],
        watermark: u32,
        account_reclaim: bool,
    ) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut pending_txns: HashMap<u64, Vec<(LogRecord, Position)>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQ;
        let mut active_offset = None;

        {
            let active = self.active_file.read();
            let inactive = self.inactive_files.read();
            let active_id = active.as_ref().map(|f| f.file_id());

            for &file_id in file_ids {
                if file_id < watermark {
                    continue;
                }
                let file: &DataFile = if Some(file_id) == active_id {
                    active.as_ref().ok_or(EngineError::DataFileNotFound)?
                } else {
                    inactive
                        .get(&file_id)
                        .ok_or(EngineError::DataFileNotFound)?
                };

                let mut offset = 0u64;
                loop {
                    let (record, size) = match file.read_record(offset) {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        // a torn tail truncates the file here instead of
                        // failing the open
                        Err(
                            LogFileError::InvalidCrc
                            | LogFileError::ShortRead
                            | LogFileError::UnknownRecordType(_),
                        ) => {
                            warn!("file {file_id}: truncating replay at offset {offset}");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    };

                    let pos = Position {
                        file_id,
                        offset,
                        size,
                    };
                    let seq = record.seq;

                    if seq == NON_TXN_SEQ {
                        self.apply_replayed(record, pos, account_reclaim)?;
                    } else if record.rec_type == RecordType::TxnFinish {
                        // commit point: apply the buffered transaction in
                        // log order
                        if let Some(records) = pending_txns.remove(&seq) {
                            for (rec, rec_pos) in records {
                                self.apply_replayed(rec, rec_pos, account_reclaim)?;
                            }
                        }
                    } else {
                        pending_txns.entry(seq).or_default().push((record, pos));
                    }

                    max_seq = max_seq.max(seq);
                    offset += u64::from(size);
                }

                if Some(file_id) == active_id {
                    active_offset = Some(offset);
                }
                debug!("file {file_id}: replayed to offset {offset}");
            }
        }

        if !pending_txns.is_empty() {
            warn!(
                "discarded {} unfinished transaction(s) from the log",
                pending_txns.len()
            );
        }

        // appends continue right after the last intact record; torn bytes
        // past it are dropped so the O_APPEND back-end lands where the
        // recovered offset says it will
        if let Some(offset) = active_offset {
            if let Some(active) = self.active_file.write().as_mut() {
                if offset < active.size()? {
                    let path = logfile::data_file_path(&self.config.dir_path, active.file_id());
                    let file = std::fs::OpenOptions::new().write(true).open(&path)?;
                    file.set_len(offset)?;
                    file.sync_all()?;
                    active.switch_io(IoKind::Standard)?;
                }
                active.set_write_offset(offset);
            }
        }
        self.seq_no.fetch_max(max_seq, Ordering::AcqRel);
        Ok(())
    }

    /// Applies one replayed record to the index, optionally feeding the
    /// reclaim counter with displaced positions.
    fn apply_replayed(&self, record: LogRecord, pos: Position, account_reclaim: bool) -> Result<()> {
        match record.rec_type {
            RecordType::Tombstone => {
                // the key may be gone already: the delete could race a merge
                // and land after the rewrite that dropped its target
                if self.index.get(&record.key)?.is_none() {
                    return Ok(());
                }
                let old = self
                    .index
                    .delete(&record.key)?
                    .ok_or(EngineError::IndexDeleteFailed)?;
                if account_reclaim {
                    self.reclaimable.fetch_add(
                        u64::from(old.size) + u64::from(pos.size),
                        Ordering::AcqRel,
                    );
                }
            }
            RecordType::Normal => {
                if let Some(old) = self.index.put(record.key, pos)? {
                    if account_reclaim {
                        self.reclaimable
                            .fetch_add(u64::from(old.size), Ordering::AcqRel);
                    }
                }
            }
            RecordType::TxnFinish => {}
        }
        Ok(())
    }

    /// Loads the persisted sequence counter (on-disk B+ tree index only).
    pub(crate) fn load_sequence_file(&self) -> Result<()> {
        let path = self.config.dir_path.join(logfile::SEQUENCE_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let file = DataFile::open_sequence(&self.config.dir_path)?;
        let (record, _) = file
            .read_record(0)?
            .ok_or_else(|| EngineError::DirectoryCorrupted("empty sequence-number file".into()))?;
        self.seq_no.store(record.seq, Ordering::Release);
        Ok(())
    }

    /// Rebinds every data file to the buffered back-end once index loading
    /// is done; the mmap back-end only exists to speed up that scan.
    pub(crate) fn switch_io_to_standard(&self) -> Result<()> {
        if let Some(active) = self.active_file.write().as_mut() {
            active.switch_io(IoKind::Standard)?;
        }
        for file in self.inactive_files.write().values_mut() {
            file.switch_io(IoKind::Standard)?;
        }
        Ok(())
    }
}
