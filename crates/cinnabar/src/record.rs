//! Log record codec for the append-only segment files.
//!
//! # Record Format
//!
//! ```text
//! [crc32:u32 LE][kind:u8][key_len:varint][value_len:varint][key][value]
//!      4B           1B        1-5B             1-5B         var    var
//! ```
//!
//! The checksum covers every byte after the CRC field. Both length fields
//! are zigzag varints of 32-bit values, so the header never exceeds
//! [`MAX_RECORD_HEADER_SIZE`] bytes. A header that parses as all zeros
//! (crc, key length, and value length) marks the logical end of a segment;
//! so does a buffer too short to hold a header at all.
//!
//! Keys are stored with an unsigned-varint sequence-number prefix: zero for
//! plain writes, a shared positive value for every record of a batch.

use bytes::{BufMut, BytesMut};
use integer_encoding::VarInt;

use crate::{Result, StoreError};

/// Bytes reserved for the checksum at the front of each record.
pub const CRC_SIZE: usize = 4;

/// Largest possible header: crc(4) + kind(1) + two 32-bit varints (5 each).
pub const MAX_RECORD_HEADER_SIZE: usize = CRC_SIZE + 1 + 5 + 5;

/// Sequence number used by every non-batch write.
pub const NON_BATCH_SEQ: u64 = 0;

/// Key of the record that terminates a committed batch.
pub const BATCH_FINISH_KEY: &[u8] = b"txn-fin";

/// What a log record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A live key/value pair.
    Normal = 0,
    /// A deletion marker; hides earlier records for the key until merge.
    Tombstone = 1,
    /// Terminator proving every record of a batch reached the log.
    BatchFinish = 2,
}

impl RecordKind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Normal),
            1 => Some(Self::Tombstone),
            2 => Some(Self::BatchFinish),
            _ => None,
        }
    }
}

/// A single record in a segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: RecordKind,
}

impl LogRecord {
    /// Serializes the record, returning the frame and its on-disk size.
    pub fn encode(&self) -> (BytesMut, u32) {
        let key_len = self.key.len() as i32;
        let value_len = self.value.len() as i32;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_bytes(0, CRC_SIZE);
        buf.put_u8(self.kind.as_byte());

        let mut scratch = [0u8; 5];
        let n = key_len.encode_var(&mut scratch);
        buf.put_slice(&scratch[..n]);
        let n = value_len.encode_var(&mut scratch);
        buf.put_slice(&scratch[..n]);

        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        let size = buf.len() as u32;
        (buf, size)
    }

    /// On-disk size of the encoded record.
    pub fn encoded_len(&self) -> usize {
        CRC_SIZE
            + 1
            + (self.key.len() as i32).required_space()
            + (self.value.len() as i32).required_space()
            + self.key.len()
            + self.value.len()
    }
}

/// Parsed record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub crc: u32,
    pub kind: RecordKind,
    pub key_size: u32,
    pub value_size: u32,
}

/// Decodes a record header from the front of `buf`.
///
/// Returns `None` at the logical end of a segment: a buffer of four bytes
/// or fewer, a header that does not fully parse (a write torn mid-header
/// is indistinguishable from a short read), or the all-zero end marker.
pub fn decode_record_header(buf: &[u8]) -> Result<Option<(RecordHeader, usize)>> {
    if buf.len() <= CRC_SIZE {
        return Ok(None);
    }

    let crc = u32::from_le_bytes(buf[..CRC_SIZE].try_into().expect("slice is 4 bytes"));
    let kind_byte = buf[CRC_SIZE];

    let Some((key_len, n_key)) = i32::decode_var(&buf[CRC_SIZE + 1..]) else {
        return Ok(None);
    };
    let Some((value_len, n_value)) = i32::decode_var(&buf[CRC_SIZE + 1 + n_key..]) else {
        return Ok(None);
    };
    let header_size = CRC_SIZE + 1 + n_key + n_value;

    if crc == 0 && key_len == 0 && value_len == 0 {
        return Ok(None);
    }

    let kind = RecordKind::from_byte(kind_byte).ok_or(StoreError::DataFileCorrupt {
        reason: "unknown record kind",
    })?;
    if key_len < 0 || value_len < 0 {
        return Err(StoreError::DataFileCorrupt {
            reason: "negative length in record header",
        });
    }

    Ok(Some((
        RecordHeader {
            crc,
            kind,
            key_size: key_len as u32,
            value_size: value_len as u32,
        },
        header_size,
    )))
}

/// Recomputes the checksum of a decoded record.
///
/// `header_tail` is the header with the CRC field stripped, exactly as it
/// appears on disk.
pub fn record_crc(record: &LogRecord, header_tail: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Location of a record: owning segment, byte offset, encoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

impl Position {
    /// Encodes the position as a compact varint triple.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 5 + 10 + 5];
        let mut n = self.file_id.encode_var(&mut buf);
        n += self.offset.encode_var(&mut buf[n..]);
        n += self.size.encode_var(&mut buf[n..]);
        buf.truncate(n);
        buf
    }

    /// Decodes a position previously produced by [`Position::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let corrupt = || StoreError::DataFileCorrupt {
            reason: "truncated position record",
        };
        let (file_id, n) = u32::decode_var(buf).ok_or_else(corrupt)?;
        let (offset, m) = u64::decode_var(&buf[n..]).ok_or_else(corrupt)?;
        let (size, _) = u32::decode_var(&buf[n + m..]).ok_or_else(corrupt)?;
        Ok(Self {
            file_id,
            offset,
            size,
        })
    }
}

/// Prefixes `key` with an unsigned-varint sequence number.
pub fn encode_record_key(key: &[u8], seq: u64) -> Vec<u8> {
    let mut out = vec![0u8; seq.required_space() + key.len()];
    let n = seq.encode_var(&mut out);
    out[n..].copy_from_slice(key);
    out
}

/// Splits a stored key into the caller's key and its sequence number.
pub fn parse_record_key(enc: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (seq, n) = u64::decode_var(enc).ok_or(StoreError::DataFileCorrupt {
        reason: "stored key missing sequence prefix",
    })?;
    Ok((enc[n..].to_vec(), seq))
}
