//! Append-Only File
//!
//! Mutating commands are recorded to a log file in the same array framing
//! clients use, so restarting the server and replaying the log through the
//! ordinary [`Decoder`](crate::protocol::Decoder) reconstructs the dataset.
//!
//! ## Architecture
//!
//! ```text
//!  handlers ──append()──┐
//!  handlers ──append()──┼──► bounded queue ──► aof-writer thread ──► appendonly.aof
//!  handlers ──append()──┘         │                   ▲
//!                                 │                   │ read guard per batch
//!                                 ▼                   │
//!                          capture channel       pause lock (RwLock)
//!                         (optional copy)        write guard = paused
//! ```
//!
//! Handlers never wait for the disk: they push onto the queue and return. The
//! queue only pushes back on producers once it is full. A crash can therefore
//! lose whatever was still queued; no fsync is issued per command.
//!
//! ## Replay
//!
//! [`load`] feeds the file through the decoder and dispatches each frame
//! straight to its handler with log emission switched off. A malformed record
//! stops replay at that point. A record cut short by a crash is removed from
//! the file before the writer appends anything after it.

mod loader;
mod writer;

pub use loader::{load, LoadReport, LoadStop};
pub use writer::{Aof, AofPause};

use std::path::PathBuf;
use thiserror::Error;

/// Default capacity of the AOF queue, in frames.
pub const DEFAULT_QUEUE_SIZE: usize = 1 << 16;

/// Default log file name, relative to the working directory.
pub const DEFAULT_FILENAME: &str = "appendonly.aof";

/// Settings for the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AofConfig {
    /// Log file location
    pub path: PathBuf,

    /// Frames the queue holds before producers block
    pub queue_size: usize,

    /// Replay at most this many bytes on startup; `None` replays everything
    pub load_max_bytes: Option<u64>,
}

impl AofConfig {
    /// Creates a config for `path` with default queue size and no replay bound.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            queue_size: DEFAULT_QUEUE_SIZE,
            load_max_bytes: None,
        }
    }
}

impl Default for AofConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FILENAME)
    }
}

/// Errors raised by the append-only log.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("failed to open AOF file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read AOF file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to truncate AOF file {}: {source}", .path.display())]
    Truncate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start AOF writer: {0}")]
    Spawn(std::io::Error),

    /// The log has been closed; no more records are accepted
    #[error("AOF is closed")]
    Closed,
}
