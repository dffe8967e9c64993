//! I/O error types.

/// Errors from an I/O manager.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying OS I/O error, surfaced verbatim.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Operation not supported by this backend (writes on a read-only map).
    #[error("{op} is not supported by the {backend} backend")]
    Unsupported {
        op: &'static str,
        backend: &'static str,
    },

    /// A write persisted fewer bytes than requested.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}
