//! Shared per-node health registry
//!
//! The registry is the single owner of per-node state: rolling stats and
//! breaker state live together in one entry, keyed by node identity, so
//! that updates to a node's stats and breaker are serialized relative to
//! each other while different nodes proceed independently. Other
//! components look nodes up by key; nothing duplicates this state.

use crate::breaker::{Breaker, BreakerConfig, BreakerState};
use crate::error::{HealthError, Result};
use crate::score::Scorer;
use crate::stats::{now_ms, NodeStats, Outcome};
use crate::DEFAULT_PRUNE_AFTER_MS;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Node identity: service name + endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    service: Arc<str>,
    endpoint: Arc<str>,
}

impl NodeKey {
    pub fn new(service: &str, endpoint: &str) -> Self {
        Self {
            service: Arc::from(service),
            endpoint: Arc::from(endpoint),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.service, self.endpoint)
    }
}

/// All mutable state for one node, guarded by its registry entry lock
#[derive(Debug)]
struct NodeHealth {
    stats: NodeStats,
    breaker: Breaker,
    in_flight: u32,
    trial_in_flight: u32,
    last_observed: Instant,
}

/// Read-only view of one node, for gossip and diagnostics
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub key: NodeKey,
    pub score: f64,
    pub state: BreakerState,
    pub last_success_ms: Option<u64>,
    pub in_flight: u32,
}

/// Registry of per-node health state
pub struct HealthRegistry {
    nodes: DashMap<NodeKey, NodeHealth>,
    scorer: Scorer,
    breaker_config: BreakerConfig,
    prune_after: Duration,
}

impl HealthRegistry {
    pub fn new(scorer: Scorer, breaker_config: BreakerConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            scorer,
            breaker_config,
            prune_after: Duration::from_millis(DEFAULT_PRUNE_AFTER_MS),
        }
    }

    pub fn with_prune_after(mut self, prune_after: Duration) -> Self {
        self.prune_after = prune_after;
        self
    }

    fn new_node(&self) -> NodeHealth {
        NodeHealth {
            stats: NodeStats::new(),
            breaker: Breaker::new(self.breaker_config.clone()),
            in_flight: 0,
            trial_in_flight: 0,
            last_observed: Instant::now(),
        }
    }

    /// Breaker state a routing decision should act on, applying any due
    /// open -> half_open promotion. Unknown nodes are closed.
    pub fn effective_state(&self, key: &NodeKey) -> BreakerState {
        match self.nodes.get_mut(key) {
            Some(mut entry) => entry.breaker.effective_state(),
            None => BreakerState::Closed,
        }
    }

    /// Admit a request to a node. Returns a guard that tracks in-flight
    /// accounting (and the trial slot while half-open); `None` means the
    /// node is not routable right now.
    pub fn begin_request(self: &Arc<Self>, key: &NodeKey) -> Option<RequestGuard> {
        let trial = {
            let mut entry = self
                .nodes
                .entry(key.clone())
                .or_insert_with(|| self.new_node());
            entry.last_observed = Instant::now();

            match entry.breaker.effective_state() {
                BreakerState::Closed => {
                    entry.in_flight += 1;
                    false
                }
                BreakerState::HalfOpen => {
                    if entry.trial_in_flight >= entry.breaker.half_open_max_requests() {
                        debug!(node = %key, "half-open trial slots exhausted");
                        return None;
                    }
                    entry.trial_in_flight += 1;
                    entry.in_flight += 1;
                    true
                }
                BreakerState::Open => return None,
            }
        };

        Some(RequestGuard {
            registry: Arc::clone(self),
            key: key.clone(),
            trial,
            released: false,
        })
    }

    /// Record one request outcome against a node. Stats and breaker are
    /// updated under the same entry lock, so no two reports can race past
    /// a threshold crossing inconsistently.
    pub fn record_outcome(&self, key: &NodeKey, outcome: &Outcome) -> Result<()> {
        if !outcome.is_valid() {
            return Err(HealthError::InvalidOutcome(format!(
                "latency {} for node {}",
                outcome.latency_ms, key
            )));
        }

        let mut entry = self
            .nodes
            .entry(key.clone())
            .or_insert_with(|| self.new_node());
        entry.last_observed = Instant::now();
        entry.stats.record(outcome, now_ms());
        match outcome.kind {
            crate::stats::OutcomeKind::Success => entry.breaker.on_success(),
            crate::stats::OutcomeKind::Error | crate::stats::OutcomeKind::Timeout => {
                entry.breaker.on_failure()
            }
        }
        Ok(())
    }

    /// Aggregate health score under the registry's own (metrics) weights
    pub fn score(&self, key: &NodeKey, now_ms: u64) -> f64 {
        self.score_with(key, &self.scorer, now_ms)
    }

    /// Score under a caller-supplied weight set (the router's request-time
    /// override)
    pub fn score_with(&self, key: &NodeKey, scorer: &Scorer, now_ms: u64) -> f64 {
        match self.nodes.get(key) {
            Some(entry) => scorer.score(&entry.stats, now_ms),
            None => scorer.score(&NodeStats::new(), now_ms),
        }
    }

    pub fn last_success_ms(&self, key: &NodeKey) -> Option<u64> {
        self.nodes.get(key).and_then(|e| e.stats.last_success_ms)
    }

    pub fn in_flight(&self, key: &NodeKey) -> u32 {
        self.nodes.get(key).map(|e| e.in_flight).unwrap_or(0)
    }

    /// Snapshot every tracked node (gossip delta collection, diagnostics)
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let now = now_ms();
        self.nodes
            .iter()
            .map(|entry| NodeSnapshot {
                key: entry.key().clone(),
                score: self.scorer.score(&entry.stats, now),
                state: entry.breaker.state(),
                last_success_ms: entry.stats.last_success_ms,
                in_flight: entry.in_flight,
            })
            .collect()
    }

    /// Drop nodes that have not been observed for a prolonged period
    pub fn prune(&self) {
        let prune_after = self.prune_after;
        self.nodes
            .retain(|_, health| health.last_observed.elapsed() < prune_after);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn release(&self, key: &NodeKey, trial: bool) {
        if let Some(mut entry) = self.nodes.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if trial {
                entry.trial_in_flight = entry.trial_in_flight.saturating_sub(1);
            }
        }
    }
}

/// In-flight accounting for one admitted request. Dropping the guard
/// without reporting releases the slot so an abandoned request cannot
/// starve half-open trials.
pub struct RequestGuard {
    registry: Arc<HealthRegistry>,
    key: NodeKey,
    trial: bool,
    released: bool,
}

impl RequestGuard {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report the outcome of the request and release accounting. The
    /// update is applied synchronously; the next routing decision sees it.
    pub fn complete(mut self, outcome: &Outcome) -> Result<()> {
        let result = self.registry.record_outcome(&self.key, outcome);
        self.registry.release(&self.key, self.trial);
        self.released = true;
        result
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(&self.key, self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Outcome;

    fn registry(threshold: u32, cooldown_ms: u64, half_open_max: u32) -> Arc<HealthRegistry> {
        Arc::new(HealthRegistry::new(
            Scorer::new_with_defaults(),
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
                half_open_max_requests: half_open_max,
            },
        ))
    }

    #[test]
    fn test_unknown_node_is_routable_and_neutral() {
        let reg = registry(5, 10_000, 1);
        let key = NodeKey::new("svc", "a:1");

        assert_eq!(reg.effective_state(&key), BreakerState::Closed);
        assert_eq!(reg.score(&key, now_ms()), crate::NEUTRAL_SCORE);
    }

    #[test]
    fn test_failures_open_breaker_and_block_admission() {
        let reg = registry(3, 60_000, 1);
        let key = NodeKey::new("svc", "a:1");

        for _ in 0..3 {
            reg.record_outcome(&key, &Outcome::error(10.0)).unwrap();
        }

        assert_eq!(reg.effective_state(&key), BreakerState::Open);
        assert!(reg.begin_request(&key).is_none());
    }

    #[test]
    fn test_trial_slot_exhaustion_and_release() {
        let reg = registry(1, 10, 1);
        let key = NodeKey::new("svc", "a:1");

        reg.record_outcome(&key, &Outcome::error(10.0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(reg.effective_state(&key), BreakerState::HalfOpen);

        // Single trial slot: the second admission is refused
        let guard = reg.begin_request(&key).expect("trial admitted");
        assert!(guard.is_trial());
        assert!(reg.begin_request(&key).is_none());

        // Dropping without a report frees the slot
        drop(guard);
        assert!(reg.begin_request(&key).is_some());
    }

    #[test]
    fn test_trial_success_closes_breaker() {
        let reg = registry(1, 10, 1);
        let key = NodeKey::new("svc", "a:1");

        reg.record_outcome(&key, &Outcome::timeout(5000.0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let guard = reg.begin_request(&key).expect("trial admitted");
        guard.complete(&Outcome::success(20.0)).unwrap();

        assert_eq!(reg.effective_state(&key), BreakerState::Closed);
        assert_eq!(reg.in_flight(&key), 0);
    }

    #[test]
    fn test_invalid_outcome_rejected_without_corruption() {
        let reg = registry(5, 10_000, 1);
        let key = NodeKey::new("svc", "a:1");

        reg.record_outcome(&key, &Outcome::success(50.0)).unwrap();
        let before = reg.score(&key, now_ms());

        let err = reg.record_outcome(&key, &Outcome::success(f64::NAN));
        assert!(matches!(err, Err(HealthError::InvalidOutcome(_))));
        assert_eq!(reg.score(&key, now_ms()), before);
    }

    #[test]
    fn test_in_flight_accounting() {
        let reg = registry(5, 10_000, 1);
        let key = NodeKey::new("svc", "a:1");

        let g1 = reg.begin_request(&key).unwrap();
        let g2 = reg.begin_request(&key).unwrap();
        assert_eq!(reg.in_flight(&key), 2);

        g1.complete(&Outcome::success(10.0)).unwrap();
        assert_eq!(reg.in_flight(&key), 1);
        drop(g2);
        assert_eq!(reg.in_flight(&key), 0);
    }

    #[test]
    fn test_prune_drops_stale_nodes() {
        let reg = Arc::new(
            HealthRegistry::new(Scorer::new_with_defaults(), BreakerConfig::default())
                .with_prune_after(Duration::from_millis(10)),
        );
        let key = NodeKey::new("svc", "a:1");
        reg.record_outcome(&key, &Outcome::success(10.0)).unwrap();
        assert_eq!(reg.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        reg.prune();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_concurrent_reports_cross_threshold_once() {
        let reg = registry(10, 60_000, 1);
        let key = NodeKey::new("svc", "a:1");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let reg = Arc::clone(&reg);
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    reg.record_outcome(&key, &Outcome::error(10.0)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 20 failures against threshold 10: exactly open, no lost updates
        assert_eq!(reg.effective_state(&key), BreakerState::Open);
    }
}
