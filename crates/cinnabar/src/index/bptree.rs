//! Persistent on-disk index backend.
//!
//! Wraps an embedded `sled` tree stored under `<dir>/bptree-index`. Unlike
//! the in-memory backends, this index survives restarts and IS the source
//! of truth at open: the engine skips log replay entirely and restores the
//! batch sequence counter from the seq-no sidecar instead.
//!
//! The tree is internally synchronized, so no additional lock wraps it.
//! Failures while updating it leave the index and the log disagreeing
//! about committed data, which is unrecoverable mid-flight; mirroring the
//! original engine, such failures abort rather than return.

use std::path::Path;

use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use crate::segment::BPTREE_DIR_NAME;
use crate::{Result, StoreError};

/// Durable ordered index backed by an embedded on-disk tree.
pub struct BptreeIndex {
    db: sled::Db,
}

impl BptreeIndex {
    /// Opens (creating if necessary) the tree under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir.join(BPTREE_DIR_NAME)).map_err(|e| StoreError::Io {
            source: e.into(),
        })?;
        Ok(Self { db })
    }

    fn decode(value: &[u8]) -> Position {
        Position::decode(value).expect("b+tree index holds a corrupt position")
    }
}

impl Indexer for BptreeIndex {
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        let old = self
            .db
            .insert(key, pos.encode())
            .expect("failed to write b+tree index");
        old.map(|v| Self::decode(&v))
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.db
            .get(key)
            .expect("failed to read b+tree index")
            .map(|v| Self::decode(&v))
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let old = self
            .db
            .remove(key)
            .expect("failed to delete from b+tree index");
        match old {
            Some(v) => (Some(Self::decode(&v)), true),
            None => (None, false),
        }
    }

    fn len(&self) -> usize {
        self.db.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        Box::new(BptreeIterator::new(self.db.clone(), reverse))
    }

    fn close(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| StoreError::Io { source: e.into() })?;
        Ok(())
    }
}

/// Live cursor over the persistent tree.
///
/// Each call advances the underlying range iterator; `seek` re-anchors it
/// at the requested bound. Unlike the snapshot iterators, concurrent
/// mutations may become visible mid-iteration.
struct BptreeIterator {
    db: sled::Db,
    reverse: bool,
    cursor: sled::Iter,
    current: Option<(Vec<u8>, Position)>,
    closed: bool,
}

impl BptreeIterator {
    fn new(db: sled::Db, reverse: bool) -> Self {
        let cursor = db.iter();
        let mut it = Self {
            db,
            reverse,
            cursor,
            current: None,
            closed: false,
        };
        it.advance();
        it
    }

    fn advance(&mut self) {
        if self.closed {
            self.current = None;
            return;
        }
        let item = if self.reverse {
            self.cursor.next_back()
        } else {
            self.cursor.next()
        };
        self.current = item
            .transpose()
            .expect("failed to iterate b+tree index")
            .map(|(k, v)| (k.to_vec(), BptreeIndex::decode(&v)));
    }
}

impl IndexIterator for BptreeIterator {
    fn rewind(&mut self) {
        if self.closed {
            return;
        }
        self.cursor = self.db.iter();
        self.advance();
    }

    fn seek(&mut self, key: &[u8]) {
        if self.closed {
            return;
        }
        self.cursor = if self.reverse {
            self.db.range(..=key.to_vec())
        } else {
            self.db.range(key.to_vec()..)
        };
        self.advance();
    }

    fn next(&mut self) {
        self.advance();
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator is not valid").0
    }

    fn value(&self) -> Position {
        self.current.as_ref().expect("iterator is not valid").1
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
    }
}
