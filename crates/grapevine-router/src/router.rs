//! Adaptive node selection
//!
//! A routing decision composes three inputs: directory lookup (who claims
//! to serve this name), local health (score and breaker state per node),
//! and gossip influence (what peers have observed). Candidates are ranked
//! by blended score and the best node that admits the request wins.

use crate::error::{Result, RouterError};
use grapevine_directory::Directory;
use grapevine_gossip::HintTable;
use grapevine_health::{
    now_ms, BreakerState, HealthRegistry, NodeKey, Outcome, RequestGuard, Scorer,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// One ranked routing candidate
#[derive(Debug, Clone)]
struct Candidate {
    key: NodeKey,
    blended: f64,
    last_success_ms: Option<u64>,
    in_flight: u32,
}

/// An admitted request: which node to call, with in-flight accounting
/// held until the caller reports the outcome.
pub struct Selection {
    key: NodeKey,
    blended: f64,
    guard: RequestGuard,
}

impl Selection {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn endpoint(&self) -> &str {
        self.key.endpoint()
    }

    /// Blended score the node was selected at
    pub fn score(&self) -> f64 {
        self.blended
    }

    /// Whether this request occupies a half-open trial slot
    pub fn is_trial(&self) -> bool {
        self.guard.is_trial()
    }

    /// Report how the request went. Applied synchronously: the very next
    /// routing decision observes the updated stats and breaker state.
    pub fn report(self, outcome: &Outcome) -> Result<()> {
        self.guard.complete(outcome)?;
        Ok(())
    }
}

pub struct AdaptiveRouter {
    directory: Arc<dyn Directory>,
    registry: Arc<HealthRegistry>,
    hints: Arc<HintTable>,
    scorer: Scorer,
}

impl AdaptiveRouter {
    /// `scorer` carries the client-side weight overrides; the registry
    /// keeps its own weights for the aggregate scores it gossips.
    pub fn new(
        directory: Arc<dyn Directory>,
        registry: Arc<HealthRegistry>,
        hints: Arc<HintTable>,
        scorer: Scorer,
    ) -> Self {
        Self {
            directory,
            registry,
            hints,
            scorer,
        }
    }

    /// Pick a node for `service` and admit a request to it
    pub async fn route(&self, service: &str) -> Result<Selection> {
        let endpoints = self.directory.lookup(service).await?;
        if endpoints.is_empty() {
            return Err(RouterError::NoEligibleNodes(service.to_string()));
        }

        let now = now_ms();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let key = NodeKey::new(service, endpoint);
            if self.registry.effective_state(&key) == BreakerState::Open {
                debug!(node = %key, "skipping open node");
                continue;
            }

            let local = self.registry.score_with(&key, &self.scorer, now);
            let blended = (local + self.hints.influence(&key, now)).clamp(0.0, 1.0);
            candidates.push(Candidate {
                last_success_ms: self.registry.last_success_ms(&key),
                in_flight: self.registry.in_flight(&key),
                key,
                blended,
            });
        }

        candidates.sort_by(|a, b| {
            b.blended
                .partial_cmp(&a.blended)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.last_success_ms.cmp(&a.last_success_ms))
                .then_with(|| a.in_flight.cmp(&b.in_flight))
        });

        // Half-open nodes rank normally but may refuse admission once
        // their trial slots fill; fall through to the next candidate.
        for candidate in candidates {
            if let Some(guard) = self.registry.begin_request(&candidate.key) {
                debug!(
                    node = %candidate.key,
                    score = candidate.blended,
                    trial = guard.is_trial(),
                    "routed request"
                );
                return Ok(Selection {
                    key: candidate.key,
                    blended: candidate.blended,
                    guard,
                });
            }
        }

        Err(RouterError::NoEligibleNodes(service.to_string()))
    }
}
