//! Health tracking error types

use thiserror::Error;

/// Health-specific errors
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("invalid outcome report: {0}")]
    InvalidOutcome(String),
}

/// Result type for health operations
pub type Result<T> = std::result::Result<T, HealthError>;
