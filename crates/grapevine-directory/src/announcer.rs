//! Periodic service announcement loop

use crate::directory::Directory;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Re-announces a service endpoint on a fixed interval until stopped.
/// A failed announce is logged and retried on the next tick; it never
/// takes the process down.
pub struct Announcer {
    directory: Arc<dyn Directory>,
    service: String,
    endpoint: String,
    announce_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl Announcer {
    pub fn new(
        directory: Arc<dyn Directory>,
        service: impl Into<String>,
        endpoint: impl Into<String>,
        announce_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        Self {
            directory,
            service: service.into(),
            endpoint: endpoint.into(),
            announce_interval,
            shutdown_tx,
            task: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the announce loop. The first announce happens immediately;
    /// subsequent ones on the configured interval.
    pub async fn start(&self) {
        info!(
            service = %self.service,
            endpoint = %self.endpoint,
            interval_ms = self.announce_interval.as_millis() as u64,
            "starting announcer"
        );

        let directory = Arc::clone(&self.directory);
        let service = self.service.clone();
        let endpoint = self.endpoint.clone();
        let announce_interval = self.announce_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(announce_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(service = %service, "announcer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match directory.announce(&service, &endpoint).await {
                            Ok(()) => debug!(service = %service, endpoint = %endpoint, "re-announced"),
                            Err(e) => warn!(
                                service = %service,
                                endpoint = %endpoint,
                                error = %e,
                                "announce failed, retrying on next tick"
                            ),
                        }
                    }
                }
            }
        });

        *self.task.write().await = Some(handle);
    }

    /// Stop scheduling further announces and wait for the loop to drain.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.task.write().await.take() {
            let _ = handle.await;
        }
    }
}
