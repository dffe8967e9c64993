//! Error types surfaced by the storage engine.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Keys must be at least one byte long.
    #[error("key is empty")]
    KeyEmpty,

    /// The in-memory index rejected an update.
    #[error("failed to update the index")]
    IndexUpdateFailed,

    /// The key is absent, or its latest record is a tombstone.
    #[error("key not found")]
    KeyNotFound,

    /// The index points at a segment the engine does not own.
    #[error("data file {file_id} not found")]
    DataFileNotFound { file_id: u32 },

    /// A record failed its CRC check or a filename would not parse.
    #[error("data file corrupt: {reason}")]
    DataFileCorrupt { reason: &'static str },

    /// The batch exceeds its configured entry limit.
    #[error("batch holds {pending} entries, limit is {limit}")]
    BatchTooLarge { pending: usize, limit: usize },

    /// Another merge is running on this engine.
    #[error("merge already in progress")]
    MergeInProgress,

    /// The reclaimable fraction has not reached the configured ratio.
    #[error("reclaimable fraction {ratio:.3} below merge threshold {threshold:.3}")]
    BelowMergeThreshold { ratio: f32, threshold: f32 },

    /// The filesystem lacks headroom for rewriting the live data.
    #[error("merge needs {required} bytes, {available} available")]
    MergeSpaceInsufficient { required: u64, available: u64 },

    /// Another process holds the directory lock.
    #[error("data directory is in use by another process")]
    DatabaseInUse,

    /// Open-time options validation failed.
    #[error("invalid options: {reason}")]
    InvalidOptions { reason: &'static str },

    /// Pass-through OS error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Pass-through error from an I/O manager.
    #[error(transparent)]
    SegmentIo(#[from] cinnabar_io::IoError),
}
