//! Segment files: the append-only units of the log.
//!
//! A segment is identified by a `u32` ID rendered as nine zero-padded
//! decimal digits plus the `.data` suffix. Exactly one segment accepts
//! appends at any time; rotation freezes it and opens the successor. The
//! sidecar files written by merge and shutdown (`hint-index`,
//! `merge-finished`, `seq-no`) reuse the same record framing and are
//! handled through the same type.

use std::path::{Path, PathBuf};

use cinnabar_io::{open_io_manager, IoKind, IoManager};

use crate::record::{
    decode_record_header, record_crc, LogRecord, Position, RecordKind, CRC_SIZE,
    MAX_RECORD_HEADER_SIZE,
};
use crate::{Result, StoreError};

/// Suffix of every numbered segment file.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Hint-index sidecar written by merge.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Marker proving a merge ran to completion.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// Sidecar persisting the last committed batch sequence.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";
/// Advisory lock file guaranteeing one process per directory.
pub const LOCK_FILE_NAME: &str = "flock";
/// Directory used by the persistent index backend.
pub const BPTREE_DIR_NAME: &str = "bptree-index";

/// Returns the path of segment `file_id` inside `dir`.
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

/// One log file: a numbered segment or a record-framed sidecar.
pub struct Segment {
    file_id: u32,
    write_off: u64,
    io: Box<dyn IoManager>,
}

impl Segment {
    /// Opens (creating if necessary) segment `file_id` inside `dir`.
    pub fn open(dir: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::open_path(&data_file_path(dir, file_id), file_id, kind)
    }

    /// Opens the hint-index sidecar inside `dir`.
    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoKind::Buffered)
    }

    /// Opens the merge-finished marker inside `dir`.
    pub fn open_merge_finished(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoKind::Buffered)
    }

    /// Opens the sequence-number sidecar inside `dir`.
    pub fn open_seq_no(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoKind::Buffered)
    }

    fn open_path(path: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = open_io_manager(path, kind)?;
        Ok(Self {
            file_id,
            write_off: 0,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Offset the next append lands at.
    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    /// Adjusts the append offset; recovery calls this after replay.
    pub fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    /// Current size of the backing file.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.io.len()?)
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the record and its on-disk size, or `None` at the logical
    /// end of the segment (past the last byte, a short header, or the
    /// all-zero end marker). A record whose body is cut short or whose
    /// checksum does not match is [`StoreError::DataFileCorrupt`].
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.len()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Clamp the header read to the end of the file.
        let header_cap = MAX_RECORD_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_cap];
        let n = self.io.read_at(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let Some((header, header_size)) = decode_record_header(&header_buf)? else {
            return Ok(None);
        };

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut record = LogRecord {
            key: Vec::new(),
            value: Vec::new(),
            kind: header.kind,
        };

        if key_size + value_size > 0 {
            let mut body = vec![0u8; key_size + value_size];
            let n = self.io.read_at(&mut body, offset + header_size as u64)?;
            if n < body.len() {
                return Err(StoreError::DataFileCorrupt {
                    reason: "record body truncated",
                });
            }
            record.value = body.split_off(key_size);
            record.key = body;
        }

        if record_crc(&record, &header_buf[CRC_SIZE..header_size]) != header.crc {
            return Err(StoreError::DataFileCorrupt {
                reason: "record checksum mismatch",
            });
        }

        Ok(Some((record, (header_size + key_size + value_size) as u64)))
    }

    /// Appends raw bytes and advances the write offset.
    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.append(buf)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Appends a `(key, position)` record to a hint-index sidecar.
    pub fn write_hint_record(&mut self, key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: pos.encode(),
            kind: RecordKind::Normal,
        };
        let (encoded, _) = record.encode();
        self.append(&encoded)?;
        Ok(())
    }

    /// Flushes the segment to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()?;
        Ok(())
    }

    /// Flushes and releases the segment.
    pub fn close(&self) -> Result<()> {
        self.io.close()?;
        Ok(())
    }

    /// Replaces the I/O manager, reopening the file under `dir`.
    ///
    /// Used once recovery finishes to move a memory-mapped segment back to
    /// buffered I/O.
    pub fn set_io(&mut self, dir: &Path, kind: IoKind) -> Result<()> {
        self.io = open_io_manager(&data_file_path(dir, self.file_id), kind)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NON_BATCH_SEQ;

    fn record(key: &[u8], value: &[u8], kind: RecordKind) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            kind,
        }
    }

    #[test]
    fn data_file_names_are_nine_digit_padded() {
        let dir = Path::new("/db");
        assert_eq!(
            data_file_path(dir, 0),
            PathBuf::from("/db/000000000.data")
        );
        assert_eq!(
            data_file_path(dir, 712),
            PathBuf::from("/db/000000712.data")
        );
    }

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 0, IoKind::Buffered).unwrap();

        let first = record(b"alpha", b"one", RecordKind::Normal);
        let second = record(b"beta", b"", RecordKind::Tombstone);
        let (buf, first_size) = first.encode();
        segment.append(&buf).unwrap();
        let (buf, _) = second.encode();
        segment.append(&buf).unwrap();

        let (read, size) = segment.read_record(0).unwrap().unwrap();
        assert_eq!(read, first);
        assert_eq!(size, u64::from(first_size));

        let (read, _) = segment.read_record(size).unwrap().unwrap();
        assert_eq!(read, second);
    }

    #[test]
    fn read_past_end_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 1, IoKind::Buffered).unwrap();
        assert!(segment.read_record(0).unwrap().is_none());

        let (buf, size) = record(b"k", b"v", RecordKind::Normal).encode();
        segment.append(&buf).unwrap();
        assert!(segment.read_record(u64::from(size)).unwrap().is_none());
        assert!(segment.read_record(1 << 20).unwrap().is_none());
    }

    #[test]
    fn write_off_tracks_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 2, IoKind::Buffered).unwrap();
        assert_eq!(segment.write_off(), 0);

        let (buf, size) = record(b"k", b"v", RecordKind::Normal).encode();
        segment.append(&buf).unwrap();
        assert_eq!(segment.write_off(), u64::from(size));
    }

    #[test]
    fn flipped_bit_fails_the_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 3, IoKind::Buffered).unwrap();
        let (buf, _) = record(b"key", b"value", RecordKind::Normal).encode();
        segment.append(&buf).unwrap();
        segment.sync().unwrap();

        // Flip one bit in the value region, behind the segment's back.
        let path = data_file_path(dir.path(), 3);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x40;
        std::fs::write(&path, raw).unwrap();

        let reopened = Segment::open(dir.path(), 3, IoKind::Buffered).unwrap();
        assert!(matches!(
            reopened.read_record(0),
            Err(StoreError::DataFileCorrupt { .. })
        ));
    }

    #[test]
    fn truncated_body_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 4, IoKind::Buffered).unwrap();
        let (buf, _) = record(b"key", b"a-much-longer-value", RecordKind::Normal).encode();
        segment.append(&buf).unwrap();
        segment.sync().unwrap();

        let path = data_file_path(dir.path(), 4);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 6]).unwrap();

        let reopened = Segment::open(dir.path(), 4, IoKind::Buffered).unwrap();
        assert!(matches!(
            reopened.read_record(0),
            Err(StoreError::DataFileCorrupt { .. })
        ));
    }

    #[test]
    fn hint_record_roundtrips_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut hint = Segment::open_hint(dir.path()).unwrap();
        let pos = Position {
            file_id: 5,
            offset: 12_345,
            size: 99,
        };
        hint.write_hint_record(b"the-key", pos).unwrap();
        hint.sync().unwrap();

        let hint = Segment::open_hint(dir.path()).unwrap();
        let (read, _) = hint.read_record(0).unwrap().unwrap();
        assert_eq!(read.key, b"the-key");
        assert_eq!(Position::decode(&read.value).unwrap(), pos);
    }

    #[test]
    fn mmap_segment_reads_what_buffered_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Segment::open(dir.path(), 6, IoKind::Buffered).unwrap();
        let original = record(
            &crate::record::encode_record_key(b"k", NON_BATCH_SEQ),
            b"v",
            RecordKind::Normal,
        );
        let (buf, _) = original.encode();
        writer.append(&buf).unwrap();
        writer.sync().unwrap();

        let mapped = Segment::open(dir.path(), 6, IoKind::Mmap).unwrap();
        let (read, _) = mapped.read_record(0).unwrap().unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn set_io_swaps_map_back_to_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Segment::open(dir.path(), 7, IoKind::Buffered).unwrap();
        let (buf, size) = record(b"k", b"v", RecordKind::Normal).encode();
        writer.append(&buf).unwrap();
        writer.sync().unwrap();

        let mut segment = Segment::open(dir.path(), 7, IoKind::Mmap).unwrap();
        segment.set_write_off(u64::from(size));
        segment.set_io(dir.path(), IoKind::Buffered).unwrap();

        let (buf, _) = record(b"k2", b"v2", RecordKind::Normal).encode();
        segment.append(&buf).unwrap();
        let (read, _) = segment.read_record(u64::from(size)).unwrap().unwrap();
        assert_eq!(read.key, b"k2");
    }
}
