//! Read-only memory-mapped I/O backend.
//!
//! Used only during startup recovery, where the replay scan reads every
//! record of every segment sequentially; serving those reads from a map
//! avoids one syscall per record. The backend is strictly read-only:
//! `append` and `sync` fail with [`IoError::Unsupported`].

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use crate::{IoError, IoManager};

/// Read-only memory-mapped view of a file.
///
/// Empty files cannot be mapped, so a fresh segment is represented by
/// `None` and reads as zero bytes.
#[derive(Debug)]
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Opens (creating if necessary) `path` and maps it read-only.
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the map is read-only and the storage layer never
        // truncates a segment while a mapped view of it exists; segments
        // only grow, and mapped managers are replaced with buffered ones
        // before the first post-recovery append.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IoManager for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let data = self.bytes();
        let len = data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let available = (len - offset) as usize;
        let n = buf.len().min(available);
        let start = offset as usize;
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn append(&self, _buf: &[u8]) -> Result<usize, IoError> {
        Err(IoError::Unsupported {
            op: "append",
            backend: "mmap",
        })
    }

    fn sync(&self) -> Result<(), IoError> {
        Err(IoError::Unsupported {
            op: "sync",
            backend: "mmap",
        })
    }

    fn len(&self) -> Result<u64, IoError> {
        Ok(self.bytes().len() as u64)
    }

    fn close(&self) -> Result<(), IoError> {
        Ok(())
    }
}
