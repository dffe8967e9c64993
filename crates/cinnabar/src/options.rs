//! Engine, batch, and iterator configuration.

use std::path::PathBuf;

use crate::{Result, StoreError};

/// Which in-memory index implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    /// Ordered balanced tree, fully in memory.
    #[default]
    BalancedTree,
    /// Adaptive radix tree, fully in memory; cheaper for long shared
    /// key prefixes.
    AdaptiveRadixTree,
    /// Durable on-disk tree; the engine skips log replay at open.
    PersistentBPlusTree,
}

/// Options accepted by [`Store::open`](crate::Store::open).
#[derive(Debug, Clone)]
pub struct Options {
    /// Root of the data directory.
    pub dir_path: PathBuf,
    /// Segment rotation threshold in bytes.
    pub segment_size: u64,
    /// fsync after every mutation.
    pub sync_on_write: bool,
    /// When > 0 and `sync_on_write` is off, fsync once this many written
    /// bytes accumulate.
    pub sync_every_bytes: u64,
    /// Index backend selection.
    pub index_backend: IndexBackend,
    /// Use memory-mapped reads for the recovery scan.
    pub mmap_on_start: bool,
    /// Reclaimable fraction below which `merge()` fails fast; in [0, 1].
    pub merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("cinnabar"),
            segment_size: 256 * 1024 * 1024,
            sync_on_write: false,
            sync_every_bytes: 0,
            index_backend: IndexBackend::default(),
            mmap_on_start: false,
            merge_ratio: 0.5,
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidOptions {
                reason: "dir_path is empty",
            });
        }
        if self.segment_size == 0 {
            return Err(StoreError::InvalidOptions {
                reason: "segment_size must be greater than zero",
            });
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(StoreError::InvalidOptions {
                reason: "merge_ratio must lie within [0, 1]",
            });
        }
        Ok(())
    }
}

/// Options for a single [`WriteBatch`](crate::WriteBatch).
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Upper bound on pending entries per batch.
    pub max_batch_size: usize,
    /// fsync the active segment when the batch commits.
    pub sync_on_commit: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_on_commit: true,
        }
    }
}

/// Options for a [`StoreIterator`](crate::StoreIterator).
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Visit only keys beginning with this byte prefix.
    pub prefix: Vec<u8>,
    /// Traverse in descending key order.
    pub reverse: bool,
}
