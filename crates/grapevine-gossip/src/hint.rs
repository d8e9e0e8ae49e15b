//! Hint wire format

use crate::error::{GossipError, Result};
use crate::MAX_BATCH_HINTS;
use serde::{Deserialize, Serialize};

/// One decaying health signal about a node, as published by a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hint {
    pub service: String,
    pub endpoint: String,
    /// Observed health delta in [-1, 1]; negative means the node got worse
    pub delta: f64,
    /// When the originating peer observed the change, Unix ms
    pub origin_ms: u64,
}

impl Hint {
    pub fn is_valid(&self) -> bool {
        self.delta.is_finite()
            && self.delta.abs() <= 1.0
            && self.origin_ms > 0
            && !self.service.is_empty()
            && !self.endpoint.is_empty()
    }
}

/// A batch of hints from one peer, the unit of transmission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintBatch {
    /// Identity of the publishing client instance
    pub origin: String,
    pub hints: Vec<Hint>,
}

impl HintBatch {
    /// Compact wire encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and sanity-check a received batch. Oversized or unattributed
    /// batches are rejected outright; per-hint validation happens at merge.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let batch: HintBatch = bincode::deserialize(bytes)?;
        if batch.origin.is_empty() {
            return Err(GossipError::Malformed("batch without origin".into()));
        }
        if batch.hints.len() > MAX_BATCH_HINTS {
            return Err(GossipError::Malformed(format!(
                "batch of {} hints exceeds {}",
                batch.hints.len(),
                MAX_BATCH_HINTS
            )));
        }
        Ok(batch)
    }
}
