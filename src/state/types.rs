//! State types for tracking reconciled resources.
//!
//! These types record what the engine last observed for each declared
//! resource. They are written only after a successful remote call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ResourceAddress, ResourceIntent, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Last-known state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Remote identifier.
    pub id: u64,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Attributes as last applied or observed.
    pub attributes: ResourceIntent,
    /// Hash of `attributes`.
    pub config_hash: String,
    /// When the entry was first recorded.
    pub created_at: DateTime<Utc>,
    /// When the entry was last rewritten.
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    /// Creates a fresh state entry.
    #[must_use]
    pub fn new(id: u64, attributes: ResourceIntent, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: attributes.kind(),
            attributes,
            config_hash: config_hash.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the attributes, keeping id and creation time.
    #[must_use]
    pub fn with_attributes(mut self, attributes: ResourceIntent, config_hash: impl Into<String>) -> Self {
        self.kind = attributes.kind();
        self.attributes = attributes;
        self.config_hash = config_hash.into();
        self.updated_at = Utc::now();
        self
    }
}

/// On-disk document holding every resource state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    /// State format version.
    pub version: String,
    /// Resource states keyed by address.
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddress, ResourceState>,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
}

impl StateDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Adds or replaces an entry.
    pub fn set(&mut self, address: ResourceAddress, state: ResourceState) {
        self.resources.insert(address, state);
        self.last_updated = Utc::now();
    }

    /// Removes an entry.
    pub fn remove(&mut self, address: &ResourceAddress) -> Option<ResourceState> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkIntent;

    fn network(range: &str) -> ResourceIntent {
        ResourceIntent::Network(NetworkIntent {
            name: String::from("private"),
            labels: BTreeMap::new(),
            ip_range: range.parse().unwrap(),
        })
    }

    #[test]
    fn test_with_attributes_keeps_identity() {
        let state = ResourceState::new(7, network("10.0.0.0/16"), "a");
        let created = state.created_at;

        let updated = state.with_attributes(network("10.1.0.0/16"), "b");
        assert_eq!(updated.id, 7);
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.config_hash, "b");
    }

    #[test]
    fn test_document_serializes_addresses_as_keys() {
        let mut doc = StateDocument::new();
        let address: ResourceAddress = "hcloud_network.private".parse().unwrap();
        doc.set(address.clone(), ResourceState::new(1, network("10.0.0.0/16"), "h"));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["version"], "1");
        assert_eq!(json["resources"]["hcloud_network.private"]["id"], 1);

        let back: StateDocument = serde_json::from_value(json).unwrap();
        assert!(back.resources.contains_key(&address));
    }
}
