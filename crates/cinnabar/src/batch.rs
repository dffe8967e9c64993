//! Atomic write batches.
//!
//! A [`WriteBatch`] stages puts and deletes in memory and commits them
//! under one sequence number. On disk a committed batch is the run of its
//! records (each key prefixed with the shared sequence) terminated by a
//! BatchFinish record. Recovery applies a sequence's records only after
//! seeing that terminator, so a commit interrupted at any earlier point
//! leaves no visible effect.
//!
//! Within a batch the last operation on a key wins; the staging map is
//! ordered by key, so records reach the log in key order.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::options::BatchOptions;
use crate::record::{encode_record_key, LogRecord, Position, RecordKind, BATCH_FINISH_KEY};
use crate::store::Store;
use crate::{Result, StoreError};

/// A staged set of operations that commits atomically.
pub struct WriteBatch<'a> {
    store: &'a Store,
    options: BatchOptions,
    pending: Mutex<BTreeMap<Vec<u8>, LogRecord>>,
}

impl Store {
    /// Creates an empty batch against this store.
    pub fn new_batch(&self, options: BatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            store: self,
            options,
            pending: Mutex::new(BTreeMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stages a put. Visible only after [`commit`](Self::commit).
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::KeyEmpty);
        }
        self.pending.lock().insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                kind: RecordKind::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete.
    ///
    /// When the engine holds nothing for the key, there is nothing a
    /// tombstone could hide: a pending put within this batch is simply
    /// withdrawn, and otherwise the operation is dropped.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::KeyEmpty);
        }

        let mut pending = self.pending.lock();
        if self.store.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                kind: RecordKind::Tombstone,
            },
        );
        Ok(())
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether the batch stages nothing.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Commits every staged operation under one fresh sequence number.
    ///
    /// On failure the staged operations are kept, so the caller may retry;
    /// any records already written lack their BatchFinish and are
    /// discarded by the next recovery.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size {
            return Err(StoreError::BatchTooLarge {
                pending: pending.len(),
                limit: self.options.max_batch_size,
            });
        }

        // Serialize commits so sequence numbers hit the log in order.
        let _commit_guard = self.store.batch_lock.lock();
        let seq = self.store.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: BTreeMap<Vec<u8>, Position> = BTreeMap::new();
        for (key, staged) in pending.iter() {
            let pos = self.store.append_log_record(&LogRecord {
                key: encode_record_key(key, seq),
                value: staged.value.clone(),
                kind: staged.kind,
            })?;
            positions.insert(key.clone(), pos);
        }

        let finish = LogRecord {
            key: encode_record_key(BATCH_FINISH_KEY, seq),
            value: Vec::new(),
            kind: RecordKind::BatchFinish,
        };
        self.store.append_log_record(&finish)?;

        if self.options.sync_on_commit {
            self.store.sync()?;
        }

        // The batch is durable; fold its effects into the index with the
        // same reclaim accounting replay would perform.
        for (key, staged) in pending.iter() {
            let pos = positions[key];
            match staged.kind {
                RecordKind::Normal => {
                    if let Some(old) = self.store.index.put(key.clone(), pos) {
                        self.store
                            .reclaim_bytes
                            .fetch_add(u64::from(old.size), Ordering::SeqCst);
                    }
                }
                RecordKind::Tombstone => {
                    let mut reclaimed = u64::from(pos.size);
                    let (old, _) = self.store.index.delete(key);
                    if let Some(old) = old {
                        reclaimed += u64::from(old.size);
                    }
                    self.store
                        .reclaim_bytes
                        .fetch_add(reclaimed, Ordering::SeqCst);
                }
                RecordKind::BatchFinish => {}
            }
        }

        pending.clear();
        Ok(())
    }
}
