//! Hetzner Cloud API integration module.
//!
//! This module provides the remote API capability used by the executor, its
//! HTTP implementation, and the wire types of the firewall and network
//! endpoints.

mod api;
mod client;
mod types;

pub use api::CloudApi;
#[cfg(test)]
pub use api::MockCloudApi;
pub use client::{HCLOUD_API_URL, HcloudClient};
pub use types::{
    CreateFirewallRequest, CreateNetworkRequest, Firewall, Network, RemoteObject,
    SetRulesRequest, UpdateRequest, WireRule,
};
