//! Grapevine node health tracking
//!
//! This crate owns all per-node health state:
//! - Rolling per-node statistics (latency, error rate, timeout rate, recency)
//! - Weighted health score computation
//! - Per-node circuit breaker (closed / open / half-open)
//! - The shared registry keying both by node identity

pub mod breaker;
pub mod error;
pub mod registry;
pub mod score;
pub mod stats;

pub use breaker::{Breaker, BreakerConfig, BreakerState};
pub use error::{HealthError, Result};
pub use registry::{HealthRegistry, NodeKey, NodeSnapshot, RequestGuard};
pub use score::{ScoreWeights, Scorer};
pub use stats::{now_ms, NodeStats, Outcome, OutcomeKind};

/// Score assigned to nodes with no recorded observations
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Reference latency for normalization (anything above scores 0)
pub const MAX_LATENCY_MS: f64 = 1000.0;

/// Reference horizon for staleness normalization
pub const STALENESS_HORIZON_MS: u64 = 60_000;

/// Nodes unobserved for this long are dropped from the registry
pub const DEFAULT_PRUNE_AFTER_MS: u64 = 300_000;
