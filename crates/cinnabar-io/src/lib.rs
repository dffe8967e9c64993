//! # cinnabar-io: I/O Manager Abstraction for Cinnabar
//!
//! This crate provides a trait-based abstraction over the file I/O that the
//! storage layer performs on segment files, enabling two strategies:
//!
//! - **`FileIo`** (default): buffered `std::fs` operations, append-only
//!   writes with caller-controlled fsync
//! - **`MmapIo`**: read-only memory-mapped view, used to accelerate the
//!   replay scan at startup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │         cinnabar         │
//! │  (uses IoManager trait)  │
//! └────────────┬─────────────┘
//!              │
//! ┌────────────┴─────────────┐
//! │       cinnabar-io        │
//! │  ┌────────┐  ┌────────┐  │
//! │  │ FileIo │  │ MmapIo │  │
//! │  └────────┘  └────────┘  │
//! └──────────────────────────┘
//! ```
//!
//! A segment opened with `MmapIo` for recovery can be reopened with `FileIo`
//! once the replay finishes; the mapped backend rejects writes outright.

mod error;
mod file_io;
mod manager;
mod mmap;

pub use error::IoError;
pub use file_io::FileIo;
pub use manager::{open_io_manager, IoKind, IoManager};
pub use mmap::MmapIo;
