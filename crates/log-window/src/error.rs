//! Error types for the window engine

use crate::message::MessageTime;
use thiserror::Error;

/// Errors raised by the paging container (ranges and per-source windows)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error(
        "Message time constraint violated at position {position}: {time} is earlier than {previous}"
    )]
    TimeConstraintViolated {
        position: i64,
        time: MessageTime,
        previous: MessageTime,
    },

    #[error("Operation is not allowed while a range is open for filling")]
    RangeIsOpen,

    #[error("No range is open for filling")]
    NoOpenRange,

    #[error("Range [{begin}, {end}) is already complete")]
    RangeComplete { begin: i64, end: i64 },
}

/// Errors raised by a messages provider while reading a source
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to read log source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message at position {position}: {reason}")]
    Parse { position: i64, reason: String },

    #[error("Log source is unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a per-source reader
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Reader for '{0}' has been shut down")]
    Disposed(String),

    #[error("Reader for '{0}' is busy")]
    Busy(String),

    #[error("Failed to spawn reader thread: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ReaderError {
    /// True for the ordering violation that aborts a read pass
    pub fn is_time_constraint_violation(&self) -> bool {
        matches!(
            self,
            ReaderError::Window(WindowError::TimeConstraintViolated { .. })
        )
    }
}
