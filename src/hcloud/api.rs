//! Remote API capability.

use async_trait::async_trait;

use crate::config::{ResourceIntent, ResourceKind};
use crate::error::Result;

use super::types::RemoteObject;

/// Operations the engine needs from the cloud provider.
///
/// Implementations perform exactly one attempt per call and classify
/// failures into `ApiError::Transient`, `ApiError::Rejected` and
/// `ApiError::NotFound`; retrying is the caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Creates a new object and returns it as stored remotely.
    async fn create(&self, intent: &ResourceIntent) -> Result<RemoteObject>;

    /// Reads an object by kind and id.
    async fn read(&self, kind: ResourceKind, id: u64) -> Result<RemoteObject>;

    /// Brings an existing object in line with `intent`.
    ///
    /// For firewalls this replaces the complete rule set.
    async fn update(&self, id: u64, intent: &ResourceIntent) -> Result<RemoteObject>;

    /// Deletes an object.
    async fn delete(&self, kind: ResourceKind, id: u64) -> Result<()>;
}
