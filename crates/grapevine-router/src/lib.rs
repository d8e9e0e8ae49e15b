//! Grapevine adaptive router
//!
//! Composes directory lookups, local health scoring, breaker admission,
//! and gossip influence into a single routing decision per request.

pub mod error;
pub mod router;

pub use error::{Result, RouterError};
pub use router::{AdaptiveRouter, Selection};
