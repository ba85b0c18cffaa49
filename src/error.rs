// Error types - what the library hands back to callers

use thiserror::Error;

/// Top-level error for daybell operations.
#[derive(Error, Debug)]
pub enum DaybellError {
    /// Request shape is wrong (bad hour, empty name, volume out of range...)
    #[error("invalid request: {0}")]
    Validation(String),

    /// A referenced row does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// Engine-side failure
    #[error("playback: {0}")]
    Playback(#[from] PlaybackError),

    /// SQLite-level failure
    #[error("storage: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem trouble (db/log directory creation and friends)
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DaybellError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DaybellError::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: i64) -> Self {
        DaybellError::NotFound { kind, id }
    }
}

/// Errors raised by the playback engine itself.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("queue is empty")]
    EmptyQueue,

    #[error("start index {index} out of bounds for a queue of {len}")]
    BadStartIndex { index: usize, len: usize },

    #[error("volume {0} out of range (0-100)")]
    VolumeOutOfRange(u8),

    #[error("could not open '{name}': {reason}")]
    TrackOpen { name: String, reason: String },

    #[error("every track in the queue failed to open")]
    QueueFailed,

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DaybellError>;
