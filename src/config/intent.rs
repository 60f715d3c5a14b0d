//! Typed desired-state model.
//!
//! Every declared resource becomes a [`ResourceIntent`], a tagged variant
//! with one arm per supported resource kind. Intents are only constructed by
//! the validator, so holding one means the values passed validation.

use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Supported resource kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Hetzner Cloud firewall with an ordered rule list.
    Firewall,
    /// Hetzner Cloud private network.
    Network,
}

/// One row of the kind mapping table.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    /// Kind this row describes.
    pub kind: ResourceKind,
    /// Type name used in declaration documents and addresses.
    pub type_name: &'static str,
    /// Collection path on the Hetzner Cloud API.
    pub api_path: &'static str,
    /// Key wrapping a single object in API responses.
    pub api_object: &'static str,
}

/// Mapping between resource kinds, document type names and API endpoints.
pub const RESOURCE_KINDS: &[KindSpec] = &[
    KindSpec {
        kind: ResourceKind::Firewall,
        type_name: "hcloud_firewall",
        api_path: "firewalls",
        api_object: "firewall",
    },
    KindSpec {
        kind: ResourceKind::Network,
        type_name: "hcloud_network",
        api_path: "networks",
        api_object: "network",
    },
];

impl ResourceKind {
    /// Returns this kind's row of the mapping table.
    #[must_use]
    pub fn spec(self) -> &'static KindSpec {
        // Every kind has a row; the table is exhaustive by construction.
        match self {
            Self::Firewall => &RESOURCE_KINDS[0],
            Self::Network => &RESOURCE_KINDS[1],
        }
    }

    /// Looks up a kind by its document type name.
    #[must_use]
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        RESOURCE_KINDS
            .iter()
            .find(|row| row.type_name == type_name)
            .map(|row| row.kind)
    }

    /// Document type name (`hcloud_firewall`, ...).
    #[must_use]
    pub fn type_name(self) -> &'static str {
        self.spec().type_name
    }

    /// API collection path (`firewalls`, ...).
    #[must_use]
    pub fn api_path(self) -> &'static str {
        self.spec().api_path
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Identity of a declared resource: its kind and instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Instance name from the declaration.
    pub name: String,
}

impl ResourceAddress {
    /// Creates a new address.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.type_name(), self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, name) = s
            .split_once('.')
            .ok_or_else(|| format!("'{s}' is not an address of the form <type>.<name>"))?;
        let kind = ResourceKind::from_type_name(type_name)
            .ok_or_else(|| format!("unknown resource type '{type_name}'"))?;
        if name.is_empty() {
            return Err(format!("'{s}' has an empty instance name"));
        }
        Ok(Self::new(kind, name))
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

/// Desired attributes of one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceIntent {
    /// A firewall and its rule set.
    Firewall(FirewallIntent),
    /// A private network.
    Network(NetworkIntent),
}

impl ResourceIntent {
    /// Kind of this intent.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Firewall(_) => ResourceKind::Firewall,
            Self::Network(_) => ResourceKind::Network,
        }
    }

    /// Remote object name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Firewall(fw) => &fw.name,
            Self::Network(net) => &net.name,
        }
    }

    /// Labels attached to the remote object.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Firewall(fw) => &fw.labels,
            Self::Network(net) => &net.labels,
        }
    }

    /// Returns the firewall arm, if this is a firewall.
    #[must_use]
    pub const fn as_firewall(&self) -> Option<&FirewallIntent> {
        match self {
            Self::Firewall(fw) => Some(fw),
            Self::Network(_) => None,
        }
    }

    /// Returns the network arm, if this is a network.
    #[must_use]
    pub const fn as_network(&self) -> Option<&NetworkIntent> {
        match self {
            Self::Network(net) => Some(net),
            Self::Firewall(_) => None,
        }
    }
}

/// Desired firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallIntent {
    /// Firewall name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Rules, unique by [`RuleKey`], in declaration order.
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

impl FirewallIntent {
    /// Creates a firewall intent, collapsing rules that share a key.
    ///
    /// When several rules have the same key the last one in input order is
    /// kept at its own position and the earlier ones are dropped.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        rules: Vec<FirewallRule>,
    ) -> Self {
        let (rules, _) = collapse_duplicate_rules(rules);
        Self {
            name: name.into(),
            labels,
            rules,
        }
    }

    /// Finds a rule by key.
    #[must_use]
    pub fn rule(&self, key: &RuleKey) -> Option<&FirewallRule> {
        self.rules.iter().find(|r| r.key() == *key)
    }

    /// Rules indexed by key.
    #[must_use]
    pub fn rules_by_key(&self) -> BTreeMap<RuleKey, &FirewallRule> {
        self.rules.iter().map(|r| (r.key(), r)).collect()
    }
}

/// Removes earlier rules whose key reappears later in the list.
///
/// Returns the surviving rules in their original relative order, plus the
/// keys that had duplicates (one entry per dropped rule).
#[must_use]
pub fn collapse_duplicate_rules(rules: Vec<FirewallRule>) -> (Vec<FirewallRule>, Vec<RuleKey>) {
    let mut last_index: HashMap<RuleKey, usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        last_index.insert(rule.key(), i);
    }

    let mut dropped = Vec::new();
    let kept = rules
        .into_iter()
        .enumerate()
        .filter_map(|(i, rule)| {
            let key = rule.key();
            if last_index.get(&key) == Some(&i) {
                Some(rule)
            } else {
                dropped.push(key);
                None
            }
        })
        .collect();

    (kept, dropped)
}

/// Traffic direction of a firewall rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound traffic; matched against source IPs.
    In,
    /// Outbound traffic; matched against destination IPs.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "in",
            Self::Out => "out",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(format!("direction must be 'in' or 'out', got '{other}'")),
        }
    }
}

/// Protocol matched by a firewall rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
    /// IPsec ESP.
    Esp,
    /// GRE.
    Gre,
}

impl Protocol {
    /// All protocols accepted by the API.
    pub const ALL: [Self; 5] = [Self::Tcp, Self::Udp, Self::Icmp, Self::Esp, Self::Gre];

    /// Whether rules for this protocol carry a port.
    #[must_use]
    pub const fn takes_port(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Esp => "esp",
            Self::Gre => "gre",
        })
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.to_string() == s)
            .ok_or_else(|| format!("protocol must be one of tcp, udp, icmp, esp, gre, got '{s}'"))
    }
}

/// Port selector of a tcp/udp rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Port {
    /// Every port.
    Any,
    /// A single port.
    Single(u16),
    /// An inclusive port range.
    Range(u16, u16),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Single(port) => write!(f, "{port}"),
            Self::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for Port {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "any" {
            return Ok(Self::Any);
        }

        let parse_one = |part: &str| -> Result<u16, String> {
            match part.trim().parse::<u16>() {
                Ok(0) | Err(_) => Err(format!(
                    "port must be 'any', a number between 1 and 65535, or a range 'start-end', got '{s}'"
                )),
                Ok(port) => Ok(port),
            }
        };

        match s.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_one(start)?, parse_one(end)?);
                if start > end {
                    return Err(format!("port range '{s}' starts after it ends"));
                }
                if start == end {
                    return Ok(Self::Single(start));
                }
                Ok(Self::Range(start, end))
            }
            None => parse_one(s).map(Self::Single),
        }
    }
}

impl TryFrom<String> for Port {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Port> for String {
    fn from(port: Port) -> Self {
        port.to_string()
    }
}

/// One firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Direction.
    pub direction: Direction,
    /// Protocol.
    pub protocol: Protocol,
    /// Port selector; present exactly for tcp and udp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
    /// Source prefixes, in order.
    #[serde(default)]
    pub source_ips: Vec<IpNetwork>,
    /// Destination prefixes, in order.
    #[serde(default)]
    pub destination_ips: Vec<IpNetwork>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FirewallRule {
    /// Identity of this rule within its firewall.
    #[must_use]
    pub fn key(&self) -> RuleKey {
        RuleKey {
            direction: self.direction,
            protocol: self.protocol,
            port: self.port,
            description: self.description.clone(),
        }
    }
}

/// Identity tuple of a firewall rule: direction, protocol, port, description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuleKey {
    /// Direction.
    pub direction: Direction,
    /// Protocol.
    pub protocol: Protocol,
    /// Port selector.
    pub port: Option<Port>,
    /// Description.
    pub description: Option<String>,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.protocol)?;
        if let Some(port) = self.port {
            write!(f, "/{port}")?;
        }
        if let Some(description) = &self.description {
            write!(f, " \"{description}\"")?;
        }
        Ok(())
    }
}

/// Desired private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIntent {
    /// Network name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// IPv4 range of the network. Immutable once created.
    pub ip_range: Ipv4Network,
}
