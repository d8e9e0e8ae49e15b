//! Rolling per-node request statistics

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Exponential moving average factor (1/8)
const ALPHA: f64 = 0.125;

/// Get current Unix timestamp in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What a single request against a node produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Error,
    Timeout,
}

/// One observed request outcome, consumed immediately and never stored
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub latency_ms: f64,
}

impl Outcome {
    pub fn success(latency_ms: f64) -> Self {
        Outcome {
            kind: OutcomeKind::Success,
            latency_ms,
        }
    }

    pub fn error(latency_ms: f64) -> Self {
        Outcome {
            kind: OutcomeKind::Error,
            latency_ms,
        }
    }

    pub fn timeout(latency_ms: f64) -> Self {
        Outcome {
            kind: OutcomeKind::Timeout,
            latency_ms,
        }
    }

    /// Outcome reports with nonsense latency are rejected before they
    /// can corrupt the aggregates.
    pub fn is_valid(&self) -> bool {
        self.latency_ms.is_finite() && self.latency_ms >= 0.0
    }
}

/// EWMA-smoothed statistics for one node
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// Smoothed mean latency (milliseconds)
    pub latency_ms: f64,
    /// Smoothed error rate (0.0-1.0)
    pub error_rate: f64,
    /// Smoothed timeout rate (0.0-1.0)
    pub timeout_rate: f64,
    /// Last successful contact, Unix ms
    pub last_success_ms: Option<u64>,
    /// Number of outcomes recorded
    pub sample_count: u64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self {
            latency_ms: 0.0,
            error_rate: 0.0,
            timeout_rate: 0.0,
            last_success_ms: None,
            sample_count: 0,
        }
    }

    /// Fold one outcome into the rolling statistics. O(1).
    pub fn record(&mut self, outcome: &Outcome, now_ms: u64) {
        let error_sample = if outcome.kind == OutcomeKind::Error {
            1.0
        } else {
            0.0
        };
        let timeout_sample = if outcome.kind == OutcomeKind::Timeout {
            1.0
        } else {
            0.0
        };

        if self.sample_count == 0 {
            self.latency_ms = outcome.latency_ms;
            self.error_rate = error_sample;
            self.timeout_rate = timeout_sample;
        } else {
            self.latency_ms = ALPHA * outcome.latency_ms + (1.0 - ALPHA) * self.latency_ms;
            self.error_rate = ALPHA * error_sample + (1.0 - ALPHA) * self.error_rate;
            self.timeout_rate = ALPHA * timeout_sample + (1.0 - ALPHA) * self.timeout_rate;
        }

        if outcome.kind == OutcomeKind::Success {
            self.last_success_ms = Some(now_ms);
        }

        self.sample_count += 1;
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new()
    }
}
