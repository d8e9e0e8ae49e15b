//! Grapevine node: configuration and component wiring

pub mod config;
pub mod node;

pub use config::{Config, ConfigError};
pub use node::GrapevineNode;
