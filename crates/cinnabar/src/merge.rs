//! Merge: out-of-place compaction of rotated segments.
//!
//! A merge rewrites every still-live record from the rotated segments into
//! a scratch engine rooted at `<parent>/<dir-name>-merge`, emits a
//! `(key, position)` hint record per rewrite, and finally writes the
//! `merge-finished` marker naming the smallest segment ID the merge did
//! not cover. The host engine's files are never touched: the swap happens
//! at the next open, which deletes the superseded originals and moves the
//! rewritten files in. A merge that crashes leaves a markerless scratch
//! directory that the next open discards wholesale.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use cinnabar_io::IoKind;

use crate::fs_util;
use crate::options::{IndexBackend, Options};
use crate::record::{encode_record_key, parse_record_key, LogRecord, RecordKind, NON_BATCH_SEQ};
use crate::segment::{
    data_file_path, Segment, BPTREE_DIR_NAME, LOCK_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    SEQ_NO_FILE_NAME,
};
use crate::store::Store;
use crate::{Result, StoreError};

/// Appended to the data directory's name to form the scratch directory.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record inside the merge-finished marker.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Scratch directory for a data directory: `/tmp/db` -> `/tmp/db-merge`.
fn merge_path(dir: &Path) -> PathBuf {
    let base = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{base}{MERGE_DIR_SUFFIX}"))
}

impl Store {
    /// Compacts every rotated segment into a scratch directory.
    ///
    /// Fails fast when another merge is running, when the reclaimable
    /// fraction has not reached `merge_ratio`, or when the filesystem
    /// cannot hold a rewritten copy of the live data. The compacted files
    /// take effect at the next open.
    pub fn merge(&self) -> Result<()> {
        let Some(_merge_guard) = self.merge_lock.try_lock() else {
            return Err(StoreError::MergeInProgress);
        };

        let dir = self.options.dir_path.clone();

        let reclaimable = self.reclaim_bytes.load(Ordering::SeqCst);
        let total = fs_util::dir_size(&dir);
        let ratio = if total == 0 {
            0.0
        } else {
            reclaimable as f32 / total as f32
        };
        if ratio < self.options.merge_ratio {
            return Err(StoreError::BelowMergeThreshold {
                ratio,
                threshold: self.options.merge_ratio,
            });
        }

        let live = total.saturating_sub(reclaimable);
        let available = fs_util::available_disk_space(&dir);
        if live >= available {
            return Err(StoreError::MergeSpaceInsufficient {
                required: live,
                available,
            });
        }

        // Rotate so the set of segments to scan is closed; everything at
        // or past the cutoff stays out of this merge.
        let cutoff_id = {
            let mut active = self.active.write();
            active.sync()?;
            let old_id = active.file_id();
            let next = Segment::open(&dir, old_id + 1, IoKind::Buffered)?;
            let old = std::mem::replace(&mut *active, next);
            self.older.write().insert(old_id, old);
            old_id + 1
        };

        let mut merge_ids: Vec<u32> = self.older.read().keys().copied().collect();
        merge_ids.sort_unstable();

        tracing::info!(
            segments = merge_ids.len(),
            cutoff = cutoff_id,
            reclaimable,
            "merge started"
        );

        let merge_dir = merge_path(&dir);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        // The scratch engine only ever appends; its own index is unused,
        // so the cheap in-memory backend serves regardless of the host's,
        // and per-write syncs are pointless for files that are re-synced
        // once at the end.
        let merge_store = Store::open(Options {
            dir_path: merge_dir.clone(),
            segment_size: self.options.segment_size,
            sync_on_write: false,
            sync_every_bytes: 0,
            index_backend: IndexBackend::BalancedTree,
            mmap_on_start: false,
            merge_ratio: self.options.merge_ratio,
        })?;
        let mut hint = Segment::open_hint(&merge_dir)?;

        // Rotated segments are immutable, so the scan runs over fresh
        // read-only handles without holding the engine's locks.
        for file_id in merge_ids {
            let segment = Segment::open(&dir, file_id, IoKind::Buffered)?;
            let mut offset = 0u64;
            while let Some((record, size)) = segment.read_record(offset)? {
                let (real_key, _) = parse_record_key(&record.key)?;

                // A record is live iff the index still points exactly at it.
                let live = self
                    .index
                    .get(&real_key)
                    .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset);
                if live {
                    let pos = merge_store.append_log_record(&LogRecord {
                        key: encode_record_key(&real_key, NON_BATCH_SEQ),
                        value: record.value.clone(),
                        kind: record.kind,
                    })?;
                    hint.write_hint_record(&real_key, pos)?;
                }
                offset += size;
            }
        }

        merge_store.sync()?;
        hint.sync()?;

        // The marker's presence is what makes the scratch directory
        // eligible for the swap; write and sync it last.
        let mut finished = Segment::open_merge_finished(&merge_dir)?;
        let record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: cutoff_id.to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        let (encoded, _) = record.encode();
        finished.append(&encoded)?;
        finished.sync()?;

        merge_store.close()?;
        tracing::info!(cutoff = cutoff_id, "merge finished");
        Ok(())
    }
}

/// Swaps a completed merge into `dir` at open time.
///
/// Returns the cutoff segment ID when a completed merge was absorbed:
/// segments below it were deleted and replaced by the rewritten files, and
/// replay must skip IDs below it (the moved hint index covers them).
pub(crate) fn absorb_completed_merge(dir: &Path) -> Result<Option<u32>> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(None);
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
        // No marker: the merge died midway and nothing in here is
        // trustworthy.
        fs::remove_dir_all(&merge_dir)?;
        tracing::warn!(dir = %merge_dir.display(), "removed stale merge directory");
        return Ok(None);
    }

    let finished = Segment::open_merge_finished(&merge_dir)?;
    let Some((record, _)) = finished.read_record(0)? else {
        return Err(StoreError::DataFileCorrupt {
            reason: "merge-finished marker holds no record",
        });
    };
    let cutoff: u32 = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(StoreError::DataFileCorrupt {
            reason: "merge-finished marker does not parse",
        })?;

    // Delete the originals the merge superseded, then move the rewritten
    // segments and the hint index into place.
    for file_id in 0..cutoff {
        let path = data_file_path(dir, file_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let keep_out = [
            MERGE_FINISHED_FILE_NAME,
            SEQ_NO_FILE_NAME,
            LOCK_FILE_NAME,
            BPTREE_DIR_NAME,
        ];
        if keep_out.iter().any(|skip| name.as_os_str() == *skip) {
            continue;
        }
        fs::rename(entry.path(), dir.join(&name))?;
    }
    fs::remove_dir_all(&merge_dir)?;

    tracing::info!(cutoff, "absorbed completed merge");
    Ok(Some(cutoff))
}
