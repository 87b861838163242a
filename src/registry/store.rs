//! Restream registry implementation
//!
//! The single source of truth for configured restreams, consulted by the
//! ingest path, the config reconciler and the control surfaces.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use super::entry::{Endpoint, Restream, RestreamSnapshot};
use super::error::RegistryError;

/// Shared handle to one restream's state
pub type RestreamHandle = Arc<RwLock<Restream>>;

type RestreamMap = HashMap<String, RestreamHandle>;

/// Registry of all known restreams
///
/// Thread-safe via `RwLock`. Listing and lookups share the read side;
/// reconciliation holds a [`RegistryWriter`] for its whole read-modify-write pass.
/// Lock order is always registry first, then restream.
pub struct RestreamRegistry {
    restreams: RwLock<RestreamMap>,
}

impl RestreamRegistry {
    pub fn new() -> Self {
        Self {
            restreams: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a restream by identifier
    pub async fn get(&self, id: &str) -> Option<RestreamHandle> {
        self.restreams.read().await.get(id).cloned()
    }

    /// Insert a restream, returning the handle it replaced, if any
    ///
    /// A streaming restream is never replaced; its session stays reachable.
    pub async fn upsert(
        &self,
        restream: Restream,
    ) -> Result<Option<RestreamHandle>, RegistryError> {
        self.exclusive().await.upsert(restream).await
    }

    /// Snapshot of every restream, ordered by identifier
    pub async fn list(&self) -> Vec<RestreamSnapshot> {
        let restreams = self.restreams.read().await;

        let mut snapshots = Vec::with_capacity(restreams.len());
        for handle in restreams.values() {
            snapshots.push(handle.read().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Remove every endpoint of `id` that is not in `keep`
    ///
    /// Returns the removed endpoint identifiers.
    pub async fn remove_endpoints_not_in(
        &self,
        id: &str,
        keep: &HashSet<String>,
    ) -> Result<Vec<String>, RegistryError> {
        let removed = self.exclusive().await.remove_endpoints_not_in(id, keep).await?;
        Ok(removed.into_iter().map(|(endpoint_id, _)| endpoint_id).collect())
    }

    /// Number of registered restreams
    pub async fn len(&self) -> usize {
        self.restreams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.restreams.read().await.is_empty()
    }

    /// Enter the exclusive section for a multi-step update
    pub async fn exclusive(&self) -> RegistryWriter<'_> {
        RegistryWriter {
            restreams: self.restreams.write().await,
        }
    }
}

/// Exclusive access to the registry
///
/// Holds the registry write lock until dropped, so a sequence of operations
/// is observed atomically by lookups and listings.
pub struct RegistryWriter<'a> {
    restreams: RwLockWriteGuard<'a, RestreamMap>,
}

impl RegistryWriter<'_> {
    pub fn get(&self, id: &str) -> Option<RestreamHandle> {
        self.restreams.get(id).cloned()
    }

    pub async fn upsert(
        &mut self,
        restream: Restream,
    ) -> Result<Option<RestreamHandle>, RegistryError> {
        let id = restream.id.clone();
        if let Some(existing) = self.restreams.get(&id) {
            if existing.read().await.is_streaming() {
                return Err(RegistryError::AlreadyStreaming(id));
            }
        }

        let previous = self.restreams.insert(id.clone(), Arc::new(RwLock::new(restream)));
        tracing::debug!(restream = %id, replaced = previous.is_some(), "Restream upserted");
        Ok(previous)
    }

    /// Remove every endpoint of `id` that is not in `keep`, closing their connections
    pub async fn remove_endpoints_not_in(
        &self,
        id: &str,
        keep: &HashSet<String>,
    ) -> Result<Vec<(String, Endpoint)>, RegistryError> {
        let handle = self
            .restreams
            .get(id)
            .ok_or_else(|| RegistryError::RestreamNotFound(id.to_string()))?;

        Ok(handle.write().await.remove_endpoints_not_in(keep))
    }

    pub fn len(&self) -> usize {
        self.restreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restreams.is_empty()
    }
}

impl Default for RestreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamHeader;

    #[tokio::test]
    async fn test_upsert_and_get() {
        let registry = RestreamRegistry::new();
        assert!(registry.get("r1").await.is_none());

        assert!(registry.upsert(Restream::new("r1", "Test")).await.unwrap().is_none());
        let handle = registry.get("r1").await.unwrap();
        assert_eq!(handle.read().await.name, "Test");

        let previous = registry.upsert(Restream::new("r1", "Renamed")).await.unwrap();
        assert!(previous.is_some());
        assert_eq!(registry.get("r1").await.unwrap().read().await.name, "Renamed");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted_snapshot() {
        let registry = RestreamRegistry::new();
        registry.upsert(Restream::new("b", "B")).await.unwrap();
        registry.upsert(Restream::new("a", "A")).await.unwrap();

        let list = registry.list().await;
        let ids: Vec<&str> = list.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(list.iter().all(|r| !r.streaming));
    }

    #[tokio::test]
    async fn test_remove_endpoints_not_in() {
        let registry = RestreamRegistry::new();
        registry
            .upsert(
                Restream::new("r1", "Test")
                    .with_endpoint("a", Endpoint::new("A", "proto://a"))
                    .with_endpoint("b", Endpoint::new("B", "proto://b")),
            )
            .await
            .unwrap();

        let keep: HashSet<String> = ["b".to_string()].into();
        let removed = registry.remove_endpoints_not_in("r1", &keep).await.unwrap();
        assert_eq!(removed, vec!["a".to_string()]);

        let handle = registry.get("r1").await.unwrap();
        let endpoints: Vec<String> = handle.read().await.endpoints.keys().cloned().collect();
        assert_eq!(endpoints, vec!["b".to_string()]);

        let missing = registry.remove_endpoints_not_in("nope", &keep).await;
        assert_eq!(missing, Err(RegistryError::RestreamNotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let registry = Arc::new(RestreamRegistry::new());
        registry.upsert(Restream::new("r1", "Test")).await.unwrap();

        let guard = registry.restreams.read().await;
        // A second reader is not blocked by the first
        let list = tokio::time::timeout(std::time::Duration::from_secs(1), registry.list()).await;
        assert_eq!(list.unwrap().len(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn test_upsert_keeps_streaming_restream() {
        let registry = RestreamRegistry::new();
        registry.upsert(Restream::new("r1", "Test")).await.unwrap();

        let live = registry.get("r1").await.unwrap();
        let session = live.write().await.start_session(StreamHeader::default()).unwrap();

        let result = registry.upsert(Restream::new("r1", "Replacement")).await;
        assert_eq!(result.unwrap_err(), RegistryError::AlreadyStreaming("r1".into()));

        let current = registry.get("r1").await.unwrap();
        assert!(Arc::ptr_eq(&live, &current));
        assert!(current.read().await.is_streaming());
        assert_eq!(current.read().await.name, "Test");
        assert!(!session.cancel.is_cancelled());

        // Once idle it can be replaced again
        live.write().await.finish_session();
        assert!(registry.upsert(Restream::new("r1", "Replacement")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_writer_groups_operations() {
        let registry = RestreamRegistry::new();
        {
            let mut writer = registry.exclusive().await;
            writer
                .upsert(
                    Restream::new("r1", "Test").with_endpoint("a", Endpoint::new("A", "proto://a")),
                )
                .await
                .unwrap();
            let removed = writer.remove_endpoints_not_in("r1", &HashSet::new()).await.unwrap();
            assert_eq!(removed.len(), 1);
            assert_eq!(writer.len(), 1);

            // Readers wait for the writer to finish
            let pending =
                tokio::time::timeout(std::time::Duration::from_millis(50), registry.get("r1"))
                    .await;
            assert!(pending.is_err());
        }

        let handle = registry.get("r1").await.unwrap();
        assert!(handle.read().await.endpoints.is_empty());
    }
}
