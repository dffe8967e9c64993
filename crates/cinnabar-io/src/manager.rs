//! I/O manager trait.
//!
//! The [`IoManager`] trait abstracts the operations a segment file needs:
//! positional reads, append writes, fsync, size, and close. Backends are
//! selected with [`IoKind`] at open time; the storage layer swaps a
//! segment's manager from [`IoKind::Mmap`] back to [`IoKind::Buffered`]
//! once startup recovery completes.

use std::path::Path;

use crate::{FileIo, IoError, MmapIo};

/// Which I/O strategy to back a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    /// Buffered `std::fs` I/O, read-write, append-only.
    #[default]
    Buffered,
    /// Read-only memory-mapped view. Writes and syncs fail.
    Mmap,
}

/// Abstraction over the file operations a segment performs.
///
/// All methods are synchronous and take `&self`; implementations must be
/// safe to share across threads behind the storage layer's locks.
pub trait IoManager: Send + Sync {
    /// Reads into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read. A count shorter than `buf.len()`
    /// means the file ended first; it is never an error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;

    /// Appends `buf` at the end of the file.
    ///
    /// Returns the number of bytes written. A short write is reported as
    /// [`IoError::ShortWrite`] rather than silently accepted.
    fn append(&self, buf: &[u8]) -> Result<usize, IoError>;

    /// Flushes file data to durable storage.
    fn sync(&self) -> Result<(), IoError>;

    /// Returns the current file size in bytes.
    fn len(&self) -> Result<u64, IoError>;

    /// Flushes and releases the backing resources.
    ///
    /// The descriptor itself is released when the manager is dropped.
    fn close(&self) -> Result<(), IoError>;
}

/// Opens an I/O manager of the requested kind for `path`.
///
/// The file is created if it does not exist, for both kinds: a mapped
/// segment may be opened before recovery has ever written to it.
pub fn open_io_manager(path: &Path, kind: IoKind) -> Result<Box<dyn IoManager>, IoError> {
    match kind {
        IoKind::Buffered => Ok(Box::new(FileIo::open(path)?)),
        IoKind::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
