//! Directory trait and in-memory implementation

use crate::error::{DirectoryError, Result};
use crate::DEFAULT_ENTRY_TTL_MS;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Black-box handle to the service directory. Safe to call from many
/// callers concurrently; implementations hold no shared mutable state
/// beyond their overlay handle.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish an endpoint's availability for a named service. The caller
    /// re-announces periodically; a single call is not durable.
    async fn announce(&self, service: &str, endpoint: &str) -> Result<()>;

    /// Endpoints currently announcing a service, in a stable order.
    /// An empty list is a valid answer, not an error.
    async fn lookup(&self, service: &str) -> Result<Vec<String>>;
}

/// DashMap-backed directory standing in for the DHT overlay in local
/// clusters and tests. Announcements expire after `entry_ttl` unless
/// refreshed, matching overlay re-announce semantics.
pub struct InMemoryDirectory {
    services: DashMap<String, HashMap<String, Instant>>,
    entry_ttl: Duration,
    available: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::with_entry_ttl(Duration::from_millis(DEFAULT_ENTRY_TTL_MS))
    }

    pub fn with_entry_ttl(entry_ttl: Duration) -> Self {
        Self {
            services: DashMap::new(),
            entry_ttl,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate overlay outage (tests, fault drills): while unavailable,
    /// announce and lookup fail with `DirectoryError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("overlay unreachable".into()))
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn announce(&self, service: &str, endpoint: &str) -> Result<()> {
        self.check_available()?;
        let mut entry = self.services.entry(service.to_string()).or_default();
        entry.insert(endpoint.to_string(), Instant::now());
        debug!(service, endpoint, "announced");
        Ok(())
    }

    async fn lookup(&self, service: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let Some(entry) = self.services.get(service) else {
            return Ok(Vec::new());
        };

        let mut endpoints: Vec<String> = entry
            .iter()
            .filter(|(_, announced)| announced.elapsed() < self.entry_ttl)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        endpoints.sort();
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_announce_then_lookup() {
        let dir = InMemoryDirectory::new();
        dir.announce("svc", "b:2").await.unwrap();
        dir.announce("svc", "a:1").await.unwrap();

        // Stable order
        assert_eq!(dir.lookup("svc").await.unwrap(), vec!["a:1", "b:2"]);
    }

    #[tokio::test]
    async fn test_lookup_unknown_service_is_empty_not_error() {
        let dir = InMemoryDirectory::new();
        assert!(dir.lookup("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire_without_reannounce() {
        let dir = InMemoryDirectory::with_entry_ttl(Duration::from_millis(10));
        dir.announce("svc", "a:1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dir.lookup("svc").await.unwrap().is_empty());

        // Re-announce refreshes
        dir.announce("svc", "a:1").await.unwrap();
        assert_eq!(dir.lookup("svc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_directory_errors() {
        let dir = InMemoryDirectory::new();
        dir.set_available(false);

        assert!(matches!(
            dir.announce("svc", "a:1").await,
            Err(DirectoryError::Unavailable(_))
        ));
        assert!(matches!(
            dir.lookup("svc").await,
            Err(DirectoryError::Unavailable(_))
        ));

        dir.set_available(true);
        assert!(dir.announce("svc", "a:1").await.is_ok());
    }
}
