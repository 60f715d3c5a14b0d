//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::ResourceState;
use crate::config::ResourceAddress;
use crate::error::Result;

/// Trait for state storage backends.
///
/// Individual operations are atomic per address; concurrent `put` calls for
/// different addresses never lose each other's writes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the state recorded for `address`, if any.
    async fn get(&self, address: &ResourceAddress) -> Result<Option<ResourceState>>;

    /// Records the state of `address`, replacing any previous entry.
    async fn put(&self, address: &ResourceAddress, state: ResourceState) -> Result<()>;

    /// Removes the entry for `address` and returns it.
    async fn delete(&self, address: &ResourceAddress) -> Result<Option<ResourceState>>;

    /// Lists every entry, ordered by address.
    async fn list(&self) -> Result<Vec<(ResourceAddress, ResourceState)>>;

    /// Acquires a lock on the state.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
