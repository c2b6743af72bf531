//! Read path: `get()`, `list_keys()`, `fold()` and positioned value reads.

use logfile::{DataFile, Position, RecordType};

use crate::{Engine, EngineError, Result};

impl Engine {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyNotFound`] when the key is absent or tombstoned,
    /// [`EngineError::KeyEmpty`] for an empty key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(EngineError::KeyEmpty);
        }

        let pos = self.index.get(key)?.ok_or(EngineError::KeyNotFound)?;
        self.value_at(pos)
    }

    /// All live keys in lexicographic order, snapshotted at call time.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f` for every live key/value pair in order, stopping early when
    /// `f` returns `false`. Holds the shared scan lock for the duration.
    pub fn fold(&self, mut f: impl FnMut(&[u8], Vec<u8>) -> bool) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.scan_lock.read();

        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = self.value_at(iter.value())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Reads the value of the record at `pos`, resolving the owning file
    /// through the active slot first and the inactive map second.
    pub(crate) fn value_at(&self, pos: Position) -> Result<Vec<u8>> {
        {
            let active = self.active_file.read();
            if let Some(file) = active.as_ref() {
                if file.file_id() == pos.file_id {
                    return read_value(file, pos);
                }
            }
        }

        let inactive = self.inactive_files.read();
        let file = inactive
            .get(&pos.file_id)
            .ok_or(EngineError::DataFileNotFound)?;
        read_value(file, pos)
    }
}

fn read_value(file: &DataFile, pos: Position) -> Result<Vec<u8>> {
    let (record, _) = file
        .read_record(pos.offset)?
        .ok_or(EngineError::KeyNotFound)?;
    if record.rec_type == RecordType::Tombstone {
        return Err(EngineError::KeyNotFound);
    }
    Ok(record.value)
}
