//! Hetzner Cloud API types and data structures.
//!
//! Wire shapes for the `/firewalls` and `/networks` endpoints, plus
//! conversions between them and the typed intents.

use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{
    Direction, FirewallIntent, FirewallRule, NetworkIntent, Port, Protocol, ResourceIntent,
    ResourceKind,
};

/// A firewall as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    /// Remote identifier.
    pub id: u64,
    /// Firewall name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Rules in remote order.
    #[serde(default)]
    pub rules: Vec<WireRule>,
    /// Creation timestamp (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// A firewall rule on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRule {
    /// `in` or `out`.
    pub direction: String,
    /// Protocol name.
    pub protocol: String,
    /// Port or port range; absent for portless protocols.
    #[serde(default)]
    pub port: Option<String>,
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

/// A private network as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Remote identifier.
    pub id: u64,
    /// Network name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// IPv4 range.
    pub ip_range: String,
    /// Creation timestamp (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// An object read back from the API, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObject {
    /// A firewall.
    Firewall(Firewall),
    /// A network.
    Network(Network),
}

impl RemoteObject {
    /// Kind of the remote object.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Firewall(_) => ResourceKind::Firewall,
            Self::Network(_) => ResourceKind::Network,
        }
    }

    /// Remote identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Firewall(fw) => fw.id,
            Self::Network(net) => net.id,
        }
    }

    /// Remote name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Firewall(fw) => &fw.name,
            Self::Network(net) => &net.name,
        }
    }

    /// Decodes the observed object into an intent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first field that does not fit the
    /// intent model (unknown protocol, malformed CIDR, ...).
    pub fn to_intent(&self) -> Result<ResourceIntent, String> {
        match self {
            Self::Firewall(fw) => {
                let rules = fw
                    .rules
                    .iter()
                    .enumerate()
                    .map(|(i, rule)| rule.to_rule().map_err(|e| format!("rules[{i}]: {e}")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ResourceIntent::Firewall(FirewallIntent::new(
                    fw.name.clone(),
                    fw.labels.clone(),
                    rules,
                )))
            }
            Self::Network(net) => {
                let ip_range = net
                    .ip_range
                    .parse::<Ipv4Network>()
                    .map_err(|e| format!("ip_range '{}': {e}", net.ip_range))?;
                Ok(ResourceIntent::Network(NetworkIntent {
                    name: net.name.clone(),
                    labels: net.labels.clone(),
                    ip_range,
                }))
            }
        }
    }
}

impl WireRule {
    /// Decodes a wire rule.
    ///
    /// # Errors
    ///
    /// Returns a description of the field that failed to decode.
    pub fn to_rule(&self) -> Result<FirewallRule, String> {
        let parse_ips = |ips: &[String]| {
            ips.iter()
                .map(|ip| {
                    ip.parse::<IpNetwork>()
                        .map_err(|e| format!("'{ip}' is not a CIDR: {e}"))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(FirewallRule {
            direction: self.direction.parse::<Direction>()?,
            protocol: self.protocol.parse::<Protocol>()?,
            port: self.port.as_deref().map(str::parse::<Port>).transpose()?,
            source_ips: parse_ips(&self.source_ips)?,
            destination_ips: parse_ips(&self.destination_ips)?,
            description: self.description.clone().filter(|d| !d.is_empty()),
        })
    }
}

impl From<&FirewallRule> for WireRule {
    fn from(rule: &FirewallRule) -> Self {
        Self {
            direction: rule.direction.to_string(),
            protocol: rule.protocol.to_string(),
            port: rule.port.map(|p| p.to_string()),
            source_ips: rule.source_ips.iter().map(ToString::to_string).collect(),
            destination_ips: rule.destination_ips.iter().map(ToString::to_string).collect(),
            description: rule.description.clone(),
        }
    }
}

/// Request body for `POST /firewalls`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateFirewallRequest {
    /// Firewall name.
    pub name: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Rules.
    pub rules: Vec<WireRule>,
}

/// Request body for `POST /networks`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateNetworkRequest {
    /// Network name.
    pub name: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// IPv4 range.
    pub ip_range: String,
}

/// Request body for `PUT /<collection>/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    /// New name.
    pub name: String,
    /// Replacement labels.
    pub labels: BTreeMap<String, String>,
}

/// Request body for `POST /firewalls/{id}/actions/set_rules`.
#[derive(Debug, Clone, Serialize)]
pub struct SetRulesRequest {
    /// Complete replacement rule set.
    pub rules: Vec<WireRule>,
}

impl From<&FirewallIntent> for CreateFirewallRequest {
    fn from(fw: &FirewallIntent) -> Self {
        Self {
            name: fw.name.clone(),
            labels: fw.labels.clone(),
            rules: fw.rules.iter().map(WireRule::from).collect(),
        }
    }
}

impl From<&NetworkIntent> for CreateNetworkRequest {
    fn from(net: &NetworkIntent) -> Self {
        Self {
            name: net.name.clone(),
            labels: net.labels.clone(),
            ip_range: net.ip_range.to_string(),
        }
    }
}

/// `{"firewall": {...}}` response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct FirewallEnvelope {
    pub firewall: Firewall,
}

/// `{"network": {...}}` response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct NetworkEnvelope {
    pub network: Network,
}

/// `{"error": {...}}` response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Error details supplied by the API.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_rule(protocol: &str, port: Option<&str>) -> WireRule {
        WireRule {
            direction: String::from("in"),
            protocol: protocol.to_string(),
            port: port.map(String::from),
            source_ips: vec![String::from("0.0.0.0/0"), String::from("::/0")],
            destination_ips: vec![],
            description: Some(String::from("allow http in")),
        }
    }

    #[test]
    fn test_firewall_json_deserialization() {
        let json = r#"{
            "firewall": {
                "id": 38,
                "name": "basic-firewall",
                "labels": {"env": "test"},
                "rules": [{
                    "direction": "in",
                    "protocol": "tcp",
                    "port": "80",
                    "source_ips": ["0.0.0.0/0", "::/0"],
                    "destination_ips": [],
                    "description": "allow http in"
                }],
                "applied_to": [],
                "created": "2016-01-30T23:55:00+00:00"
            }
        }"#;

        let envelope: FirewallEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.firewall.id, 38);
        assert_eq!(envelope.firewall.rules[0].source_ips[1], "::/0");
    }

    #[test]
    fn test_wire_rule_decodes() {
        let rule = wire_rule("tcp", Some("80")).to_rule().unwrap();
        assert_eq!(rule.direction, Direction::In);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.port, Some(Port::Single(80)));
        assert_eq!(rule.source_ips[0].to_string(), "0.0.0.0/0");
        assert_eq!(WireRule::from(&rule), wire_rule("tcp", Some("80")));
    }

    #[test]
    fn test_wire_rule_with_unknown_protocol_fails() {
        assert!(wire_rule("sctp", Some("80")).to_rule().is_err());
    }

    #[test]
    fn test_network_to_intent() {
        let object = RemoteObject::Network(Network {
            id: 4711,
            name: String::from("private"),
            labels: BTreeMap::new(),
            ip_range: String::from("10.0.0.0/16"),
            created: None,
        });

        assert_eq!(object.kind(), ResourceKind::Network);
        let intent = object.to_intent().unwrap();
        assert_eq!(intent.as_network().unwrap().ip_range.to_string(), "10.0.0.0/16");
    }
}
