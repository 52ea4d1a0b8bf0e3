//! Error types for the event queue.

use std::io;

/// Errors that can occur while operating the event queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O failure while touching a topic's on-disk state. An append that
    /// fails this way is not committed and the topic's next offset is
    /// unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller supplied an invalid argument (empty topic name, empty
    /// payload, a topic name that is not a single path component).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A wire frame or stored structure could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type for event queue operations.
pub type Result<T> = std::result::Result<T, Error>;
