//! Grapevine service directory
//!
//! Thin interface over the DHT overlay: announce a service endpoint,
//! look up the endpoints currently announcing a service name. The overlay
//! itself (wire protocol, routing tables, peer discovery) is a black box
//! behind the [`Directory`] trait.

pub mod announcer;
pub mod directory;
pub mod error;

pub use announcer::Announcer;
pub use directory::{Directory, InMemoryDirectory};
pub use error::{DirectoryError, Result};

/// Announcements older than this are no longer returned by lookups
pub const DEFAULT_ENTRY_TTL_MS: u64 = 120_000;
