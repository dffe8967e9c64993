//! # Cinnabar: an embeddable bitcask-model key-value store
//!
//! Cinnabar keeps every write in an append-only log of CRC-framed records,
//! split across numbered segment files, and resolves every read through a
//! fully in-memory ordered index from key to record position. The design
//! trades memory for predictability: one positional read per lookup, one
//! append per mutation, no in-place updates anywhere.
//!
//! # Architecture
//!
//! ```text
//! put/get/delete ──► Store ──► Indexer (btree | art | b+tree on disk)
//!                      │
//!                      ▼
//!              Segment files (append-only, CRC-framed records)
//!              000000000.data  000000001.data  ...  (one active)
//! ```
//!
//! - **Batches**: [`WriteBatch`] stages puts and deletes and commits them
//!   under one sequence number; recovery honors a batch only when its
//!   finish record reached the log.
//! - **Recovery**: opening a directory replays its segments (or, with the
//!   persistent index, skips replay) to rebuild the exact pre-crash state.
//! - **Merge**: [`Store::merge`] rewrites live records into a scratch
//!   directory with a hint index; the next open swaps the compacted files
//!   in atomically.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use cinnabar::{Options, Store};
//!
//! # fn main() -> cinnabar::Result<()> {
//! let store = Store::open(Options {
//!     dir_path: "/tmp/cinnabar-demo".into(),
//!     ..Options::default()
//! })?;
//!
//! store.put(Bytes::from("name"), Bytes::from("cinnabar"))?;
//! assert_eq!(store.get(b"name")?, Bytes::from("cinnabar"));
//! store.delete(b"name")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Exactly one process may hold a data directory at a time, enforced with
//! an advisory file lock; a second open fails with
//! [`StoreError::DatabaseInUse`].

mod batch;
mod error;
mod fs_util;
mod index;
mod iterator;
mod merge;
mod options;
mod record;
mod segment;
mod store;

pub use batch::WriteBatch;
pub use error::{Result, StoreError};
pub use iterator::StoreIterator;
pub use options::{BatchOptions, IndexBackend, IteratorOptions, Options};
pub use store::{Stat, Store};
