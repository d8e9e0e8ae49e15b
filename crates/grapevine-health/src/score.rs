//! Weighted health score computation
//!
//! A node's score is a bounded scalar in [0, 1], higher is healthier:
//! `score = 1 - (w_l * norm_latency + w_e * error_rate + w_t * timeout_rate
//!              + w_f * staleness)`
//! with every term normalized to [0, 1] and the weights summing to 1.0.

use crate::stats::NodeStats;
use crate::{MAX_LATENCY_MS, NEUTRAL_SCORE, STALENESS_HORIZON_MS};
use serde::{Deserialize, Serialize};

/// Weights for the node scoring algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub latency: f64,
    pub error: f64,
    pub timeout: f64,
    pub freshness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.40,   // 40% weight on mean latency
            error: 0.30,     // 30% weight on error rate
            timeout: 0.20,   // 20% weight on timeout rate
            freshness: 0.10, // 10% weight on time since last success
        }
    }
}

impl ScoreWeights {
    /// Validate that weights sum to 1.0 (within 0.01)
    pub fn is_valid(&self) -> bool {
        let sum = self.latency + self.error + self.timeout + self.freshness;
        (sum - 1.0).abs() < 0.01
    }

    /// Normalize weights to ensure they sum to 1.0
    pub fn normalize(&mut self) {
        let sum = self.latency + self.error + self.timeout + self.freshness;
        if sum > 0.0 {
            self.latency /= sum;
            self.error /= sum;
            self.timeout /= sum;
            self.freshness /= sum;
        }
    }
}

/// Node score calculator
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoreWeights,
    // Reference values for normalization
    max_latency_ms: f64,
    staleness_horizon_ms: u64,
}

impl Scorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            weights,
            max_latency_ms: MAX_LATENCY_MS,
            staleness_horizon_ms: STALENESS_HORIZON_MS,
        }
    }

    pub fn new_with_defaults() -> Self {
        Self::new(ScoreWeights::default())
    }

    /// Compute the health score for a node's current statistics.
    ///
    /// Nodes with no observations score a neutral 0.5 so that untested
    /// nodes are neither starved nor over-favored.
    pub fn score(&self, stats: &NodeStats, now_ms: u64) -> f64 {
        if stats.sample_count == 0 {
            return NEUTRAL_SCORE;
        }

        let latency_term = (stats.latency_ms / self.max_latency_ms).clamp(0.0, 1.0);
        let error_term = stats.error_rate.clamp(0.0, 1.0);
        let timeout_term = stats.timeout_rate.clamp(0.0, 1.0);
        let staleness_term = self.staleness(stats, now_ms);

        let penalty = self.weights.latency * latency_term
            + self.weights.error * error_term
            + self.weights.timeout * timeout_term
            + self.weights.freshness * staleness_term;

        (1.0 - penalty).clamp(0.0, 1.0)
    }

    /// Elapsed time since the last success, normalized to [0, 1].
    /// A node with samples but no success yet is maximally stale.
    fn staleness(&self, stats: &NodeStats, now_ms: u64) -> f64 {
        match stats.last_success_ms {
            Some(last) => {
                let elapsed = now_ms.saturating_sub(last);
                (elapsed as f64 / self.staleness_horizon_ms as f64).clamp(0.0, 1.0)
            }
            None => 1.0,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Outcome;

    #[test]
    fn test_default_weights_valid() {
        let weights = ScoreWeights::default();
        assert!(weights.is_valid());
    }

    #[test]
    fn test_weight_normalization() {
        let mut weights = ScoreWeights {
            latency: 2.0,
            error: 2.0,
            timeout: 2.0,
            freshness: 2.0,
        };
        weights.normalize();
        assert!(weights.is_valid());
        assert!((weights.latency - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_unobserved_node_scores_neutral() {
        let scorer = Scorer::new_with_defaults();
        assert_eq!(scorer.score(&NodeStats::new(), 1_000), NEUTRAL_SCORE);
    }

    #[test]
    fn test_score_bounded() {
        let scorer = Scorer::new_with_defaults();
        let mut stats = NodeStats::new();
        for _ in 0..20 {
            stats.record(&Outcome::timeout(10_000.0), 1_000);
        }
        let score = scorer.score(&stats, 1_000);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_healthy_node_outranks_flaky_node() {
        // Node A: no failures, 50ms latency. Node B: timeouts, 300ms latency.
        let scorer = Scorer::new_with_defaults();
        let now = 10_000;

        let mut a = NodeStats::new();
        for _ in 0..10 {
            a.record(&Outcome::success(50.0), now);
        }

        let mut b = NodeStats::new();
        for _ in 0..8 {
            b.record(&Outcome::success(300.0), now);
        }
        b.record(&Outcome::timeout(5000.0), now);
        b.record(&Outcome::timeout(5000.0), now);

        assert!(scorer.score(&a, now) > scorer.score(&b, now));
    }

    #[test]
    fn test_staleness_penalizes_old_success() {
        let scorer = Scorer::new_with_defaults();
        let mut stats = NodeStats::new();
        stats.record(&Outcome::success(50.0), 1_000);

        let fresh = scorer.score(&stats, 1_000);
        let stale = scorer.score(&stats, 1_000 + STALENESS_HORIZON_MS);
        assert!(stale < fresh);
    }
}
