//! Buffered file I/O backend using `std::fs`.
//!
//! This is the default backend. Files are opened read-write in append mode;
//! positional reads use `pread` so no seek cursor is shared between readers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::{IoError, IoManager};

/// Buffered file I/O backed by `std::fs::File`.
#[derive(Debug)]
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Opens (creating if necessary) `path` for reading and appending.
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoManager for FileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        // pread on Unix, seek_read on Windows. Loop until the buffer is
        // full or the file ends; a zero-length read marks EOF.
        let mut filled = 0;
        while filled < buf.len() {
            #[cfg(unix)]
            let n = {
                use std::os::unix::fs::FileExt;
                self.file.read_at(&mut buf[filled..], offset + filled as u64)?
            };
            #[cfg(windows)]
            let n = {
                use std::os::windows::fs::FileExt;
                self.file.seek_read(&mut buf[filled..], offset + filled as u64)?
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn append(&self, buf: &[u8]) -> Result<usize, IoError> {
        let written = (&self.file).write(buf)?;
        if written != buf.len() {
            return Err(IoError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(written)
    }

    fn sync(&self) -> Result<(), IoError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64, IoError> {
        Ok(self.file.metadata()?.len())
    }

    fn close(&self) -> Result<(), IoError> {
        self.file.sync_all()?;
        Ok(())
    }
}
