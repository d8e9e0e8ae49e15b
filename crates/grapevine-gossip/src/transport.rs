//! Hint transport abstraction
//!
//! Gossip rides the same overlay channel the directory uses; the wire
//! details stay behind this trait. The in-memory bus fans every published
//! batch out to all attached clients (including the publisher, which is
//! filtered by origin on receipt) and is the stand-in for local clusters
//! and tests.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of the in-memory bus channel
const BUS_CAPACITY: usize = 256;

/// Best-effort broadcast channel between client instances
#[async_trait]
pub trait HintTransport: Send + Sync {
    /// Publish an encoded hint batch to peers. Best-effort: failure is
    /// reported so the caller can log and retry on its next tick.
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to batches published by peers
    fn listen(&self) -> broadcast::Receiver<Vec<u8>>;
}

/// Process-local hint bus
pub struct InMemoryHintBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl InMemoryHintBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

impl Default for InMemoryHintBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HintTransport for InMemoryHintBus {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        // send() errs only when there are no subscribers; with no peers
        // attached there is nobody to gossip to, which is not a failure.
        let _ = self.tx.send(payload);
        Ok(())
    }

    fn listen(&self) -> broadcast::Receiver<Vec<u8>> {
        self.tx.subscribe()
    }
}
