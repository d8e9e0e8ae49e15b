//! Gossip error types

use thiserror::Error;

/// Gossip-specific errors
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("malformed hint: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Result type for gossip operations
pub type Result<T> = std::result::Result<T, GossipError>;
