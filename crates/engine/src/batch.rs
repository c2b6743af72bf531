//! Atomic multi-key write batches.
//!
//! A batch buffers intended writes in memory, one slot per key (later
//! operations on the same key overwrite that key's slot in place). `commit`
//! appends the pending operations in the order they were first buffered,
//! all under one fresh sequence number, terminated by a `TxnFinish` marker,
//! and only then applies them to the index. Recovery treats the marker as
//! the commit point: a crash anywhere before it discards the whole
//! transaction, a crash after it replays the whole transaction.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use logfile::{LogRecord, RecordType};
use parking_lot::Mutex;

use crate::{BatchConfig, Engine, EngineError, IndexKind, Result};

/// Key of the transaction-finish marker record. On disk only; never
/// surfaced through the index.
pub(crate) const TXN_FINISH_KEY: &[u8] = b"txn.finished";

impl Engine {
    /// Creates an empty write batch borrowing this engine.
    ///
    /// # Errors
    ///
    /// With the on-disk B+ tree index, [`EngineError::SequenceFileMissing`]
    /// when the persisted counter is absent and the directory is not fresh —
    /// without it the batch cannot be tagged with a safe sequence number.
    pub fn write_batch(&self, config: BatchConfig) -> Result<WriteBatch<'_>> {
        self.ensure_open()?;
        if self.config.index_kind == IndexKind::BPlusTree
            && !self.seq_file_exists
            && !self.is_initial
        {
            return Err(EngineError::SequenceFileMissing);
        }
        Ok(WriteBatch {
            engine: self,
            config,
            pending: Mutex::new(PendingWrites::default()),
        })
    }
}

/// Buffered operations in call order. `slots` maps each key to its record's
/// index so a later operation on the same key overwrites in place.
#[derive(Default)]
struct PendingWrites {
    records: Vec<LogRecord>,
    slots: HashMap<Vec<u8>, usize>,
}

impl PendingWrites {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.slots.contains_key(key)
    }

    fn upsert(&mut self, record: LogRecord) {
        match self.slots.get(&record.key) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.slots.insert(record.key.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        self.slots.clear();
    }
}

/// A buffered, atomically-committed set of writes. Cheap to create; one
/// mutex guards the pending operations, acquired before the engine write
/// mutex in `commit` (the only path holding both).
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    config: BatchConfig,
    pending: Mutex<PendingWrites>,
}

impl WriteBatch<'_> {
    /// Buffers a put. Overwrites any pending operation on the same key.
    ///
    /// # Errors
    ///
    /// [`EngineError::BatchTooLarge`] once the batch holds
    /// `max_batch_size` keys and `key` is not among them.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::KeyEmpty);
        }
        let mut pending = self.pending.lock();
        if pending.len() >= self.config.max_batch_size && !pending.contains(&key) {
            return Err(EngineError::BatchTooLarge);
        }
        pending.upsert(LogRecord::normal(key, value));
        Ok(())
    }

    /// Buffers a delete. Deleting a key absent from the store is still
    /// recorded (it may exist by commit time).
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::KeyEmpty);
        }
        self.pending.lock().upsert(LogRecord::tombstone(key));
        Ok(())
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Atomically commits every pending operation.
    ///
    /// Protocol: take the batch mutex, then the engine write mutex; draw a
    /// fresh sequence number; append every record with it, in the order the
    /// operations were buffered; append the `TxnFinish` marker; optionally
    /// sync; only then touch the index. A failure before the marker leaves
    /// the log with an unterminated transaction that recovery discards, and
    /// the index untouched.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.config.max_batch_size {
            return Err(EngineError::BatchTooLarge);
        }
        self.engine.ensure_open()?;

        let _guard = self.engine.write_lock.lock();
        let seq = self.engine.seq_no.fetch_add(1, Ordering::AcqRel) + 1;

        let mut positions = Vec::with_capacity(pending.len());
        for record in &pending.records {
            let pos = self.engine.append_record(&LogRecord {
                key: record.key.clone(),
                value: record.value.clone(),
                rec_type: record.rec_type,
                seq,
            })?;
            positions.push(pos);
        }
        self.engine.append_record(&LogRecord {
            key: TXN_FINISH_KEY.to_vec(),
            value: Vec::new(),
            rec_type: RecordType::TxnFinish,
            seq,
        })?;

        if self.config.sync_writes {
            if let Some(active) = self.engine.active_file.read().as_ref() {
                active.sync()?;
            }
        }

        // durable on disk; now make it visible
        let mut reclaimed = 0u64;
        for (record, pos) in pending.records.iter().zip(positions) {
            match record.rec_type {
                RecordType::Normal => {
                    if let Some(old) = self.engine.index.put(record.key.clone(), pos)? {
                        reclaimed += u64::from(old.size);
                    }
                }
                RecordType::Tombstone => {
                    if let Some(old) = self.engine.index.delete(&record.key)? {
                        reclaimed += u64::from(old.size);
                    }
                    // the tombstone record itself is dead on arrival
                    reclaimed += u64::from(pos.size);
                }
                RecordType::TxnFinish => {}
            }
        }
        if reclaimed > 0 {
            self.engine.reclaimable.fetch_add(reclaimed, Ordering::AcqRel);
        }

        pending.clear();
        Ok(())
    }
}
