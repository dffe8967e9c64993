//! Balanced-tree index backend.
//!
//! Wraps `BTreeMap` behind a read-write lock. The tree itself is not
//! concurrency-safe, so every operation takes the lock; iteration copies
//! the entries into a [`SnapshotIterator`] and runs lock-free afterwards.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::index::{IndexIterator, Indexer, SnapshotIterator};
use crate::record::Position;
use crate::Result;

/// Ordered balanced-tree index.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        match self.tree.write().remove(key) {
            Some(old) => (Some(old), true),
            None => (None, false),
        }
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let guard = self.tree.read();
        let entries: Vec<(Vec<u8>, Position)> = if reverse {
            guard.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        Box::new(SnapshotIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
