//! Local table of merged hint influence
//!
//! Received hints accumulate per node into a single external-influence
//! value that decays exponentially with time and expires entirely after
//! the hint TTL. Merging is associative and tolerant of duplicate and
//! out-of-order delivery: the same hint applied twice counts as two
//! corroborations, bounded by the influence clamp.

use crate::hint::Hint;
use crate::MAX_INFLUENCE;
use dashmap::DashMap;
use grapevine_health::NodeKey;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct Influence {
    value: f64,
    updated_ms: u64,
}

/// Per-node external influence, independently locked from the health
/// registry. Router reads never observe a partially applied merge: each
/// node's influence is a single entry updated under its shard lock.
pub struct HintTable {
    entries: DashMap<NodeKey, Influence>,
    decay_factor: f64,
    publish_interval_ms: u64,
    hint_ttl_ms: u64,
    rejected: AtomicU64,
}

impl HintTable {
    pub fn new(decay_factor: f64, publish_interval_ms: u64, hint_ttl_ms: u64) -> Self {
        Self {
            entries: DashMap::new(),
            decay_factor: decay_factor.clamp(f64::MIN_POSITIVE, 1.0),
            publish_interval_ms: publish_interval_ms.max(1),
            hint_ttl_ms,
            rejected: AtomicU64::new(0),
        }
    }

    /// Decay multiplier for a signal aged `elapsed_ms`
    fn decay(&self, elapsed_ms: u64) -> f64 {
        let intervals = elapsed_ms as f64 / self.publish_interval_ms as f64;
        self.decay_factor.powf(intervals)
    }

    /// Merge one received hint. Malformed hints are dropped with a counter
    /// increment; hints older than the TTL are discarded and never applied.
    pub fn merge(&self, hint: &Hint, now_ms: u64) {
        if !hint.is_valid() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(?hint, "dropping malformed hint");
            return;
        }

        let age_ms = now_ms.saturating_sub(hint.origin_ms);
        if age_ms >= self.hint_ttl_ms {
            trace!(age_ms, ttl_ms = self.hint_ttl_ms, "discarding expired hint");
            return;
        }

        let contribution = hint.delta * self.decay(age_ms);
        let key = NodeKey::new(&hint.service, &hint.endpoint);

        let mut entry = self.entries.entry(key).or_insert(Influence {
            value: 0.0,
            updated_ms: now_ms,
        });

        // Bring the stored value forward to `now` before accumulating, so
        // corroboration strengthens the signal while old merges fade.
        let carried = entry.value * self.decay(now_ms.saturating_sub(entry.updated_ms));
        entry.value = (carried + contribution).clamp(-MAX_INFLUENCE, MAX_INFLUENCE);
        entry.updated_ms = now_ms;
    }

    /// Current external influence for a node, zero once everything merged
    /// for it has aged past the TTL.
    pub fn influence(&self, key: &NodeKey, now_ms: u64) -> f64 {
        match self.entries.get(key) {
            Some(entry) => {
                let elapsed = now_ms.saturating_sub(entry.updated_ms);
                if elapsed >= self.hint_ttl_ms {
                    0.0
                } else {
                    entry.value * self.decay(elapsed)
                }
            }
            None => 0.0,
        }
    }

    /// Drop entries whose influence has fully expired
    pub fn purge_expired(&self, now_ms: u64) {
        let ttl = self.hint_ttl_ms;
        self.entries
            .retain(|_, inf| now_ms.saturating_sub(inf.updated_ms) < ttl);
    }

    /// Count of hints dropped as malformed
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HintTable {
        // decay 0.5 per 5s interval, 60s TTL (the configuration defaults)
        HintTable::new(0.5, 5_000, 60_000)
    }

    fn hint(delta: f64, origin_ms: u64) -> Hint {
        Hint {
            service: "svc".into(),
            endpoint: "a:1".into(),
            delta,
            origin_ms,
        }
    }

    fn key() -> NodeKey {
        NodeKey::new("svc", "a:1")
    }

    #[test]
    fn test_fresh_hint_applies_at_full_weight() {
        let t = table();
        t.merge(&hint(-0.2, 10_000), 10_000);
        assert!((t.influence(&key(), 10_000) - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_hint_decays_per_elapsed_interval() {
        let t = table();
        // Two publish intervals old at merge time: 0.5^2 = 0.25 weight
        t.merge(&hint(-0.2, 10_000), 20_000);
        assert!((t.influence(&key(), 20_000) - (-0.05)).abs() < 1e-9);
    }

    #[test]
    fn test_expired_hint_contributes_nothing() {
        let t = table();
        t.merge(&hint(-0.9, 1_000), 1_000 + 60_000);
        assert_eq!(t.influence(&key(), 1_000 + 60_000), 0.0);
        assert!(t.is_empty());
    }

    #[test]
    fn test_influence_fades_after_merge() {
        let t = table();
        t.merge(&hint(-0.2, 10_000), 10_000);

        let fresh = t.influence(&key(), 10_000);
        let later = t.influence(&key(), 15_000);
        assert!(later.abs() < fresh.abs());
        // And reads past the TTL see zero
        assert_eq!(t.influence(&key(), 10_000 + 60_000), 0.0);
    }

    #[test]
    fn test_duplicate_hint_at_most_doubles_bounded_by_clamp() {
        let t = table();
        let h = hint(-0.1, 10_000);
        t.merge(&h, 10_000);
        let once = t.influence(&key(), 10_000).abs();

        t.merge(&h, 10_000);
        let twice = t.influence(&key(), 10_000).abs();

        assert!(twice <= 2.0 * once + 1e-9);
        assert!(twice <= MAX_INFLUENCE);
    }

    #[test]
    fn test_accumulation_clamped() {
        let t = table();
        for _ in 0..50 {
            t.merge(&hint(-0.9, 10_000), 10_000);
        }
        assert!(t.influence(&key(), 10_000).abs() <= MAX_INFLUENCE + 1e-9);
    }

    #[test]
    fn test_corroboration_from_opposing_signals_cancels() {
        let t = table();
        t.merge(&hint(-0.1, 10_000), 10_000);
        t.merge(&hint(0.1, 10_000), 10_000);
        assert!(t.influence(&key(), 10_000).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_hint_counted_not_applied() {
        let t = table();
        t.merge(&hint(f64::NAN, 10_000), 10_000);
        assert_eq!(t.rejected_count(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let t = table();
        t.merge(&hint(-0.2, 10_000), 10_000);
        assert_eq!(t.len(), 1);

        t.purge_expired(10_000 + 60_000);
        assert!(t.is_empty());
    }

    #[test]
    fn test_out_of_order_merge_is_order_insensitive_in_sign() {
        let t = table();
        // An old observation arriving after a newer one still only adds a
        // tiny decayed contribution
        t.merge(&hint(-0.2, 30_000), 30_000);
        t.merge(&hint(-0.2, 5_000), 30_000);

        let v = t.influence(&key(), 30_000);
        assert!(v < 0.0);
        assert!(v.abs() <= MAX_INFLUENCE);
    }
}
