//! Error types for WorkVault

use std::io;
use thiserror::Error;

/// Result type alias for WorkVault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Error kinds surfaced by the queue, parser, dispatcher and store
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Queue closed")]
    QueueClosed,

    #[error("Queue full")]
    QueueFull,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Record not found: {0}")]
    NotFound(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for VaultError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        let detail = match err {
            nom::Err::Incomplete(_) => "incomplete request".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => format!(
                "unexpected input at {:?}",
                String::from_utf8_lossy(e.input)
            ),
        };
        VaultError::MalformedRequest(detail)
    }
}
