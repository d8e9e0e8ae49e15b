//! Node orchestrator: wires the worker, client and gossip sides together
//! and owns their lifecycle.

use crate::config::Config;
use anyhow::Result;
use grapevine_directory::{Announcer, Directory};
use grapevine_gossip::{HintPropagator, HintTable, HintTransport, PropagatorConfig, PropagatorStats};
use grapevine_health::{HealthRegistry, Scorer};
use grapevine_router::{AdaptiveRouter, Selection};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct GrapevineNode {
    config: Config,
    registry: Arc<HealthRegistry>,
    hints: Arc<HintTable>,
    router: AdaptiveRouter,
    announcer: Announcer,
    propagator: HintPropagator,
}

impl GrapevineNode {
    /// Assemble a node over the given overlay directory and gossip
    /// transport. `peer_id` identifies this instance on the gossip
    /// channel; its own batches are ignored on receipt.
    pub fn new(
        config: Config,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn HintTransport>,
        peer_id: impl Into<String>,
    ) -> Self {
        let registry = Arc::new(HealthRegistry::new(
            Scorer::new(config.metrics_weights()),
            config.breaker_config(),
        ));
        let hints = Arc::new(HintTable::new(
            config.gossip.decay_factor,
            config.gossip.publish_interval_ms,
            config.gossip.hint_ttl_ms,
        ));

        let announcer = Announcer::new(
            Arc::clone(&directory),
            config.worker.service_name.clone(),
            config.worker_endpoint(),
            Duration::from_millis(config.worker.announce_interval_ms),
        );

        let propagator = HintPropagator::new(
            PropagatorConfig {
                peer_id: peer_id.into(),
                publish_interval: Duration::from_millis(config.gossip.publish_interval_ms),
            },
            Arc::clone(&registry),
            Arc::clone(&hints),
            transport,
        );

        let router = AdaptiveRouter::new(
            directory,
            Arc::clone(&registry),
            Arc::clone(&hints),
            Scorer::new(config.client_weights()),
        );

        Self {
            config,
            registry,
            hints,
            router,
            announcer,
            propagator,
        }
    }

    /// Start the announce and gossip loops
    pub async fn start(&self) -> Result<()> {
        self.announcer.start().await;
        self.propagator.start().await;
        info!(
            service = %self.config.worker.service_name,
            endpoint = %self.config.worker_endpoint(),
            "node started"
        );
        Ok(())
    }

    /// Route one request for a service
    pub async fn route(&self, service: &str) -> grapevine_router::Result<Selection> {
        self.router.route(service).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn hints(&self) -> &Arc<HintTable> {
        &self.hints
    }

    pub fn gossip_stats(&self) -> PropagatorStats {
        self.propagator.stats()
    }

    /// Drain the background loops
    pub async fn shutdown(&self) {
        info!("shutting down node");
        self.propagator.shutdown().await;
        self.announcer.shutdown().await;
        info!("shutdown complete");
    }
}
