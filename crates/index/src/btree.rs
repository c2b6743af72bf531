//! Ordered in-memory index over `std::collections::BTreeMap`.

use std::collections::BTreeMap;

use logfile::Position;
use parking_lot::RwLock;

use crate::{IndexIterator, Indexer, Result};

/// The default index: a `BTreeMap` under a reader/writer lock. Lives only in
/// memory and is rebuilt from the log on every open.
#[derive(Default)]
pub struct BTreeIndex {
    map: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.map.read().get(key).copied())
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        Ok(self.map.write().insert(key, pos))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.map.write().remove(key))
    }

    fn size(&self) -> usize {
        self.map.read().len()
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let entries = self
            .map
            .read()
            .iter()
            .map(|(k, p)| (k.clone(), *p))
            .collect();
        Ok(IndexIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
