//! In-memory state storage backend.
//!
//! Nothing survives the process. Used by tests and by callers that embed the
//! engine and manage persistence themselves.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::ResourceState;
use crate::config::ResourceAddress;
use crate::error::Result;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    /// Resource entries.
    entries: RwLock<BTreeMap<ResourceAddress, ResourceState>>,
    /// Current lock, if any.
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (ResourceAddress, ResourceState)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
            lock: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, address: &ResourceAddress) -> Result<Option<ResourceState>> {
        Ok(self.entries.read().await.get(address).cloned())
    }

    async fn put(&self, address: &ResourceAddress, state: ResourceState) -> Result<()> {
        debug!("Recording state for {address} (id {})", state.id);
        self.entries.write().await.insert(address.clone(), state);
        Ok(())
    }

    async fn delete(&self, address: &ResourceAddress) -> Result<Option<ResourceState>> {
        debug!("Removing state for {address}");
        Ok(self.entries.write().await.remove(address))
    }

    async fn list(&self) -> Result<Vec<(ResourceAddress, ResourceState)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(address, state)| (address.clone(), state.clone()))
            .collect())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut lock = self.lock.lock().await;
        LockInfo::ensure_available(lock.as_ref())?;

        let info = LockInfo::new(holder);
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut lock = self.lock.lock().await;
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock.lock().await.as_ref().is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkIntent, ResourceIntent};

    fn entry(name: &str, id: u64) -> (ResourceAddress, ResourceState) {
        let intent = ResourceIntent::Network(NetworkIntent {
            name: name.to_string(),
            labels: BTreeMap::new(),
            ip_range: "10.0.0.0/16".parse().unwrap(),
        });
        (
            format!("hcloud_network.{name}").parse().unwrap(),
            ResourceState::new(id, intent, "hash"),
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStateStore::new();
        let (address, state) = entry("a", 1);

        store.put(&address, state.clone()).await.unwrap();
        assert_eq!(store.get(&address).await.unwrap(), Some(state.clone()));

        assert_eq!(store.delete(&address).await.unwrap(), Some(state));
        assert_eq!(store.get(&address).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_is_ordered() {
        let store = MemoryStateStore::with_entries([entry("b", 2), entry("a", 1)]);

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(address, _)| address.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("holder-1").await.unwrap();

        tokio_test::assert_err!(store.acquire_lock("holder-2").await);

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
        tokio_test::assert_ok!(store.acquire_lock("holder-2").await);
    }
}
