//! Ordered scans over the live key set.

use index::IndexIterator;
use logfile::Position;

use crate::{Engine, IteratorConfig, Result};

impl Engine {
    /// Opens an ordered iterator over a snapshot of the live keys.
    ///
    /// The snapshot is taken at this call; later mutations are not observed.
    /// With a non-empty `prefix` the iterator skips non-matching keys on
    /// every reposition, still walking the index in order.
    pub fn iterator(&self, config: IteratorConfig) -> Result<EngineIterator<'_>> {
        self.ensure_open()?;
        let inner = self.index.iterator(config.reverse)?;
        let mut iter = EngineIterator {
            engine: self,
            inner,
            config,
        };
        iter.skip_to_prefix();
        Ok(iter)
    }
}

/// Snapshot iterator handed out by [`Engine::iterator`]. Dropping it
/// releases the snapshot.
pub struct EngineIterator<'a> {
    engine: &'a Engine,
    inner: IndexIterator,
    config: IteratorConfig,
}

impl EngineIterator<'_> {
    /// Repositions at the first matching entry.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_prefix();
    }

    /// Positions at the first matching entry `>= key` (forward) or `<= key`
    /// (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_to_prefix();
    }

    /// Advances to the next matching entry.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_prefix();
    }

    /// Whether the iterator points at an entry.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Key of the current entry. Panics if `!valid()`.
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Position of the current entry. Panics if `!valid()`.
    pub fn position(&self) -> Position {
        self.inner.value()
    }

    /// Reads the current entry's value from the log.
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyNotFound`] if the record was merged away after the
    /// snapshot was taken.
    ///
    /// [`EngineError::KeyNotFound`]: crate::EngineError::KeyNotFound
    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.ensure_open()?;
        self.engine.value_at(self.inner.value())
    }

    fn skip_to_prefix(&mut self) {
        if self.config.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(&self.config.prefix) {
            self.inner.next();
        }
    }
}
