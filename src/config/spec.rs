//! Declaration document types.
//!
//! These structs map one-to-one onto the YAML document. Resource attributes
//! are kept as raw YAML until the validator knows the resource type and can
//! decode them into the matching attribute struct.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Root of a declaration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeclarationFile {
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine settings.
    #[serde(default)]
    pub settings: Settings,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory holding the local state document.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON document on the local filesystem.
    #[default]
    Local,
    /// Process memory; nothing survives the run.
    Memory,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Maximum number of resources reconciled at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retry policy for transient API failures.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Reject duplicate firewall rules instead of collapsing them.
    #[serde(default)]
    pub strict_rules: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetrySettings::default(),
            strict_rules: false,
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts per remote call, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// One entry of the `resources` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource type name (`hcloud_firewall`, `hcloud_network`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Instance name, unique per type.
    pub name: String,
    /// Type-specific attributes, decoded by the validator.
    #[serde(default)]
    pub attributes: serde_yaml::Value,
}

/// Attributes of an `hcloud_firewall` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    /// Remote firewall name.
    #[validate(length(min = 1, max = 63, message = "must be between 1 and 63 characters"))]
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Rules in declaration order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A firewall rule as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// `in` or `out`.
    pub direction: String,
    /// `tcp`, `udp`, `icmp`, `esp` or `gre`.
    pub protocol: String,
    /// `any`, a port number, or a `start-end` range.
    #[serde(default)]
    pub port: Option<PortValue>,
    /// Source CIDRs.
    #[serde(default)]
    pub source_ips: Vec<String>,
    /// Destination CIDRs.
    #[serde(default)]
    pub destination_ips: Vec<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A port written either as a bare number or as a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortValue {
    /// `port: 80`
    Number(i64),
    /// `port: "80-85"`, `port: any`
    Text(String),
}

impl std::fmt::Display for PortValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Attributes of an `hcloud_network` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Remote network name.
    #[validate(length(min = 1, max = 63, message = "must be between 1 and 63 characters"))]
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// IPv4 CIDR of the network.
    pub ip_range: String,
}

// Default value functions

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    5000
}

impl DeclarationFile {
    /// Returns the instance names of all declared resources.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }
}
