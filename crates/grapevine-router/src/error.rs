//! Router error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Lookup returned endpoints but none would admit a request
    #[error("no eligible nodes for service {0}")]
    NoEligibleNodes(String),

    #[error(transparent)]
    Directory(#[from] grapevine_directory::DirectoryError),

    #[error(transparent)]
    Health(#[from] grapevine_health::HealthError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
