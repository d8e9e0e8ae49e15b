//! Grapevine gossip hint propagation
//!
//! Client instances exchange decaying health "hints" about service nodes
//! so that an unhealthy node is avoided cluster-wide faster than each
//! client could discover it by probing alone. Hints only ever perturb the
//! blended routing score; they never touch a node's raw statistics.

pub mod error;
pub mod hint;
pub mod propagator;
pub mod table;
pub mod transport;

pub use error::{GossipError, Result};
pub use hint::{Hint, HintBatch};
pub use propagator::{HintPropagator, PropagatorConfig, PropagatorStats};
pub use table::HintTable;
pub use transport::{HintTransport, InMemoryHintBus};

/// External influence is clamped to this magnitude, bounding the
/// over-count from duplicate hint delivery.
pub const MAX_INFLUENCE: f64 = 0.25;

/// Score movement below this is not worth gossiping
pub const SIGNIFICANT_SCORE_DELTA: f64 = 0.05;

/// Upper bound on hints per published batch
pub const MAX_BATCH_HINTS: usize = 256;
