//! Gossip hint publish/merge loops

use crate::hint::{Hint, HintBatch};
use crate::table::HintTable;
use crate::transport::HintTransport;
use crate::{MAX_BATCH_HINTS, SIGNIFICANT_SCORE_DELTA};
use grapevine_health::{now_ms, BreakerState, HealthRegistry, NodeKey, NEUTRAL_SCORE};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Propagator tuning
#[derive(Debug, Clone)]
pub struct PropagatorConfig {
    /// Identity of this client instance on the gossip channel
    pub peer_id: String,
    pub publish_interval: Duration,
}

/// Gossip counters snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagatorStats {
    pub batches_published: u64,
    pub hints_merged: u64,
    pub hints_rejected: u64,
    pub batches_dropped: u64,
}

/// What a node looked like the last time we gossiped about it
#[derive(Debug, Clone, Copy)]
struct PublishedView {
    score: f64,
    state: BreakerState,
}

/// Publishes locally significant health deltas on a fixed interval and
/// merges batches received from peers into the local hint table.
pub struct HintPropagator {
    config: PropagatorConfig,
    registry: Arc<HealthRegistry>,
    table: Arc<HintTable>,
    transport: Arc<dyn HintTransport>,
    last_published: Arc<RwLock<HashMap<NodeKey, PublishedView>>>,
    batches_published: Arc<AtomicU64>,
    hints_merged: Arc<AtomicU64>,
    batches_dropped: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl HintPropagator {
    pub fn new(
        config: PropagatorConfig,
        registry: Arc<HealthRegistry>,
        table: Arc<HintTable>,
        transport: Arc<dyn HintTransport>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        Self {
            config,
            registry,
            table,
            transport,
            last_published: Arc::new(RwLock::new(HashMap::new())),
            batches_published: Arc::new(AtomicU64::new(0)),
            hints_merged: Arc::new(AtomicU64::new(0)),
            batches_dropped: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start the publish and merge loops
    pub async fn start(&self) {
        info!(
            peer_id = %self.config.peer_id,
            interval_ms = self.config.publish_interval.as_millis() as u64,
            "starting gossip propagator"
        );

        let publish_handle = self.spawn_publish_loop();
        let merge_handle = self.spawn_merge_loop();

        let mut tasks = self.tasks.write().await;
        tasks.push(publish_handle);
        tasks.push(merge_handle);
    }

    /// Stop scheduling ticks, drain both loops
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.tasks.write().await.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn stats(&self) -> PropagatorStats {
        PropagatorStats {
            batches_published: self.batches_published.load(Ordering::Relaxed),
            hints_merged: self.hints_merged.load(Ordering::Relaxed),
            hints_rejected: self.table.rejected_count(),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }

    fn spawn_publish_loop(&self) -> JoinHandle<()> {
        let peer_id = self.config.peer_id.clone();
        let publish_interval = self.config.publish_interval;
        let registry = Arc::clone(&self.registry);
        let table = Arc::clone(&self.table);
        let transport = Arc::clone(&self.transport);
        let last_published = Arc::clone(&self.last_published);
        let batches_published = Arc::clone(&self.batches_published);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Stagger publishers so client instances started together do
            // not tick in lockstep
            let jitter_ms = rand::thread_rng().gen_range(0..=publish_interval.as_millis() as u64 / 4);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

            let mut ticker = interval(publish_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(peer_id = %peer_id, "gossip publisher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        table.purge_expired(now_ms());
                        registry.prune();

                        let (hints, views) = Self::collect_deltas(&registry, &last_published).await;
                        if hints.is_empty() {
                            continue;
                        }

                        let batch = HintBatch { origin: peer_id.clone(), hints };
                        let published = match batch.encode() {
                            Ok(bytes) => transport.publish(bytes).await,
                            Err(e) => Err(e),
                        };
                        match published {
                            Ok(()) => {
                                // Only a delivered batch moves the baseline;
                                // after a failed publish the deltas are still
                                // pending and the next tick retries them.
                                let mut last = last_published.write().await;
                                for (key, view) in views {
                                    last.insert(key, view);
                                }
                                batches_published.fetch_add(1, Ordering::Relaxed);
                                debug!(
                                    peer_id = %peer_id,
                                    hints = batch.hints.len(),
                                    "published hint batch"
                                );
                            }
                            Err(e) => warn!(
                                peer_id = %peer_id,
                                error = %e,
                                "hint publish failed, retrying deltas on next tick"
                            ),
                        }
                    }
                }
            }
        })
    }

    fn spawn_merge_loop(&self) -> JoinHandle<()> {
        let peer_id = self.config.peer_id.clone();
        let table = Arc::clone(&self.table);
        let hints_merged = Arc::clone(&self.hints_merged);
        let batches_dropped = Arc::clone(&self.batches_dropped);
        let mut rx = self.transport.listen();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(peer_id = %peer_id, "gossip merger shutting down");
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(bytes) => {
                            let batch = match HintBatch::decode(&bytes) {
                                Ok(batch) => batch,
                                Err(e) => {
                                    batches_dropped.fetch_add(1, Ordering::Relaxed);
                                    debug!(peer_id = %peer_id, error = %e, "dropping undecodable batch");
                                    continue;
                                }
                            };

                            // The bus echoes our own batches back
                            if batch.origin == peer_id {
                                continue;
                            }

                            let now = now_ms();
                            for hint in &batch.hints {
                                table.merge(hint, now);
                            }
                            hints_merged.fetch_add(batch.hints.len() as u64, Ordering::Relaxed);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(peer_id = %peer_id, skipped, "gossip receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Nodes whose score moved materially, or whose breaker changed state,
    /// since the last delivered publish. Returns the hints alongside the
    /// baseline views to commit once the batch actually goes out.
    async fn collect_deltas(
        registry: &HealthRegistry,
        last_published: &RwLock<HashMap<NodeKey, PublishedView>>,
    ) -> (Vec<Hint>, Vec<(NodeKey, PublishedView)>) {
        let now = now_ms();
        let snapshot = registry.snapshot();
        let mut hints = Vec::new();
        let mut views = Vec::new();
        let mut last = last_published.write().await;

        // Baselines for nodes the registry has pruned go with them
        let live: HashSet<&NodeKey> = snapshot.iter().map(|s| &s.key).collect();
        last.retain(|key, _| live.contains(key));

        for snap in &snapshot {
            let prev = last.get(&snap.key);
            let prev_score = prev.map(|p| p.score).unwrap_or(NEUTRAL_SCORE);
            let state_changed = match prev {
                Some(p) => p.state != snap.state,
                None => snap.state != BreakerState::Closed,
            };

            let mut delta = snap.score - prev_score;
            if delta.abs() < SIGNIFICANT_SCORE_DELTA && !state_changed {
                continue;
            }

            // An opened breaker always gossips as a negative signal even
            // when the score delta alone is small
            if snap.state == BreakerState::Open {
                delta = delta.min(-SIGNIFICANT_SCORE_DELTA);
            }

            hints.push(Hint {
                service: snap.key.service().to_string(),
                endpoint: snap.key.endpoint().to_string(),
                delta: delta.clamp(-1.0, 1.0),
                origin_ms: now,
            });
            views.push((
                snap.key.clone(),
                PublishedView {
                    score: snap.score,
                    state: snap.state,
                },
            ));

            if hints.len() >= MAX_BATCH_HINTS {
                break;
            }
        }

        (hints, views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GossipError;
    use crate::transport::InMemoryHintBus;
    use async_trait::async_trait;
    use grapevine_health::{BreakerConfig, Outcome, Scorer};
    use std::sync::atomic::AtomicBool;

    fn registry() -> Arc<HealthRegistry> {
        Arc::new(HealthRegistry::new(
            Scorer::new_with_defaults(),
            BreakerConfig::default(),
        ))
    }

    fn propagator(
        peer_id: &str,
        registry: Arc<HealthRegistry>,
        transport: Arc<dyn HintTransport>,
    ) -> (HintPropagator, Arc<HintTable>) {
        let table = Arc::new(HintTable::new(0.5, 50, 60_000));
        let propagator = HintPropagator::new(
            PropagatorConfig {
                peer_id: peer_id.to_string(),
                publish_interval: Duration::from_millis(50),
            },
            registry,
            Arc::clone(&table),
            transport,
        );
        (propagator, table)
    }

    /// Fails the first publish, then delegates to a real bus
    struct FailOnceBus {
        inner: Arc<InMemoryHintBus>,
        failed: AtomicBool,
    }

    impl FailOnceBus {
        fn new(inner: Arc<InMemoryHintBus>) -> Self {
            Self {
                inner,
                failed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl HintTransport for FailOnceBus {
        async fn publish(&self, payload: Vec<u8>) -> crate::error::Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(GossipError::Transport("link down".into()));
            }
            self.inner.publish(payload).await
        }

        fn listen(&self) -> tokio::sync::broadcast::Receiver<Vec<u8>> {
            self.inner.listen()
        }
    }

    #[tokio::test]
    async fn test_degradation_gossips_to_peer() {
        let bus = Arc::new(InMemoryHintBus::new());
        let reg_a = registry();
        let reg_b = registry();

        let (prop_a, _table_a) =
            propagator("a", Arc::clone(&reg_a), Arc::clone(&bus) as Arc<dyn HintTransport>);
        let (prop_b, table_b) = propagator("b", reg_b, Arc::clone(&bus) as Arc<dyn HintTransport>);

        // Attach B's merge loop before A publishes
        prop_b.start().await;
        prop_a.start().await;

        // A observes a node collapsing
        let key = NodeKey::new("svc", "bad:1");
        for _ in 0..5 {
            reg_a.record_outcome(&key, &Outcome::timeout(5000.0)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(250)).await;

        // B heard about it without ever probing the node
        assert!(table_b.influence(&key, now_ms()) < 0.0);
        assert!(prop_b.stats().hints_merged > 0);

        prop_a.shutdown().await;
        prop_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_own_batches_are_ignored() {
        let bus = Arc::new(InMemoryHintBus::new());
        let reg = registry();
        let (prop, table) = propagator("solo", Arc::clone(&reg), bus);
        prop.start().await;

        let key = NodeKey::new("svc", "bad:1");
        for _ in 0..5 {
            reg.record_outcome(&key, &Outcome::timeout(5000.0)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(250)).await;

        // Published, but never merged back into its own table
        assert!(prop.stats().batches_published > 0);
        assert_eq!(table.influence(&key, now_ms()), 0.0);
        assert_eq!(prop.stats().hints_merged, 0);

        prop.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecodable_batches_dropped_silently() {
        let bus = Arc::new(InMemoryHintBus::new());
        let (prop, _table) = propagator("x", registry(), Arc::clone(&bus) as Arc<dyn HintTransport>);
        prop.start().await;

        bus.publish(vec![0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(prop.stats().batches_dropped, 1);
        assert_eq!(prop.stats().hints_merged, 0);

        prop.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_delta_for_next_tick() {
        let bus = Arc::new(InMemoryHintBus::new());
        let flaky = Arc::new(FailOnceBus::new(Arc::clone(&bus)));
        let reg_a = registry();

        // A publishes through a transport whose first send fails; B
        // listens on the underlying bus
        let (prop_a, _table_a) = propagator("a", Arc::clone(&reg_a), flaky);
        let (prop_b, table_b) = propagator("b", registry(), bus);
        prop_b.start().await;
        prop_a.start().await;

        let key = NodeKey::new("svc", "bad:1");
        for _ in 0..5 {
            reg_a.record_outcome(&key, &Outcome::timeout(5000.0)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;

        // The dropped batch was not forgotten: a later tick re-sent the
        // still-pending delta and B heard about the degradation
        assert!(prop_a.stats().batches_published >= 1);
        assert!(table_b.influence(&key, now_ms()) < 0.0);

        prop_a.shutdown().await;
        prop_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_nodes_pruned_on_publish_tick() {
        let bus = Arc::new(InMemoryHintBus::new());
        let reg = Arc::new(
            HealthRegistry::new(Scorer::new_with_defaults(), BreakerConfig::default())
                .with_prune_after(Duration::from_millis(50)),
        );
        let (prop, _table) = propagator("solo", Arc::clone(&reg), bus);
        prop.start().await;

        let key = NodeKey::new("svc", "a:1");
        reg.record_outcome(&key, &Outcome::success(10.0)).unwrap();
        assert_eq!(reg.len(), 1);

        // Ticks keep firing while the node goes unobserved
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(reg.is_empty());

        prop.shutdown().await;
    }

    #[tokio::test]
    async fn test_quiet_registry_publishes_nothing() {
        let bus = Arc::new(InMemoryHintBus::new());
        let (prop, _table) = propagator("quiet", registry(), bus);
        prop.start().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(prop.stats().batches_published, 0);

        prop.shutdown().await;
    }
}
