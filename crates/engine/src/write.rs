//! Write path: `put()`, `delete()`, and the append protocol.
//!
//! All mutations funnel through [`Engine::append_record`]: encode the
//! record, rotate the active file if this append would overflow it, write at
//! the captured offset, and apply the sync policy. Callers hold the engine
//! write mutex so appends and their index updates agree with log order.

use std::sync::atomic::Ordering;

use fio::IoKind;
use logfile::{DataFile, LogRecord, Position};

use crate::{Engine, EngineError, Result, INITIAL_FILE_ID};

impl Engine {
    /// Inserts or overwrites `key`. Values may be empty; keys may not.
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyEmpty`] for an empty key,
    /// [`EngineError::EngineClosed`] after close, otherwise I/O and index
    /// errors from the append.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(EngineError::KeyEmpty);
        }

        let record = LogRecord::normal(key, value);
        let old = {
            let _guard = self.write_lock.lock();
            let pos = self.append_record(&record)?;
            self.index.put(record.key, pos)?
        };

        // the overwritten record is now dead weight
        if let Some(old) = old {
            self.reclaimable
                .fetch_add(u64::from(old.size), Ordering::AcqRel);
        }
        Ok(())
    }

    /// Deletes `key` by appending a tombstone. Deleting an absent key is a
    /// successful no-op.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(EngineError::KeyEmpty);
        }
        if self.index.get(&key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::tombstone(key);
        let (pos, old) = {
            let _guard = self.write_lock.lock();
            let pos = self.append_record(&record)?;
            let old = self
                .index
                .delete(&record.key)?
                .ok_or(EngineError::IndexDeleteFailed)?;
            (pos, old)
        };

        // both the dead record and the tombstone itself are reclaimable
        self.reclaimable
            .fetch_add(u64::from(old.size) + u64::from(pos.size), Ordering::AcqRel);
        Ok(())
    }

    /// Appends one encoded record to the active file and returns its
    /// position. The caller holds the engine write mutex.
    ///
    /// Rotation: when `write_offset + encoded_size` would exceed the
    /// configured maximum, the active file is synced, sealed into the
    /// inactive map, and a successor with the next id is opened.
    pub(crate) fn append_record(&self, record: &LogRecord) -> Result<Position> {
        let encoded = record.encode();
        let size = encoded.len() as u32;

        let mut active = self.active_file.write();
        if active.is_none() {
            *active = Some(self.new_data_file(INITIAL_FILE_ID)?);
        }
        let needs_rotation = match active.as_ref() {
            Some(file) => file.write_offset() + u64::from(size) > self.config.data_file_size,
            None => false,
        };
        if needs_rotation {
            if let Some(sealed) = active.take() {
                sealed.sync()?;
                let next_id = sealed.file_id() + 1;
                self.inactive_files.write().insert(sealed.file_id(), sealed);
                *active = Some(self.new_data_file(next_id)?);
            }
        }

        let file = active.as_mut().ok_or(EngineError::DataFileNotFound)?;
        let offset = file.write_offset();
        file.append(&encoded)?;

        let written =
            self.bytes_since_sync.fetch_add(u64::from(size), Ordering::AcqRel) + u64::from(size);
        if self.config.sync_writes
            || (self.config.bytes_to_sync > 0 && written >= self.config.bytes_to_sync)
        {
            file.sync()?;
            self.bytes_since_sync.store(0, Ordering::Release);
        }

        Ok(Position {
            file_id: file.file_id(),
            offset,
            size,
        })
    }

    pub(crate) fn new_data_file(&self, file_id: u32) -> Result<DataFile> {
        Ok(DataFile::open_data(
            &self.config.dir_path,
            file_id,
            IoKind::Standard,
        )?)
    }
}
