//! Directory error types

use thiserror::Error;

/// Directory-specific errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("announce rejected: {0}")]
    AnnounceRejected(String),
}

/// Result type for directory operations
pub type Result<T> = std::result::Result<T, DirectoryError>;
