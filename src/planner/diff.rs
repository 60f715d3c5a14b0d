//! Diff engine for comparing desired intents against recorded state.
//!
//! The engine is pure: it reads an intent and a state entry and produces the
//! ordered operations that bring the remote object in line with the intent.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::config::{
    ConfigHasher, FirewallIntent, ResourceAddress, ResourceIntent, ResourceKind, RuleKey,
    ValidatedConfig,
};
use crate::state::ResourceState;

/// Engine for computing diffs between desired intents and recorded state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// A single step of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Create the remote object described by `intent`.
    Create {
        /// Target resource.
        address: ResourceAddress,
        /// Full desired attributes.
        intent: ResourceIntent,
    },
    /// Bring the existing object `id` in line with `target`.
    Update {
        /// Target resource.
        address: ResourceAddress,
        /// Remote identifier.
        id: u64,
        /// Full desired attributes; firewall rules are sent as a complete set.
        target: ResourceIntent,
        /// Fields that differ from the recorded state.
        changes: Vec<FieldChange>,
    },
    /// Delete the remote object `id`.
    Delete {
        /// Target resource.
        address: ResourceAddress,
        /// Kind of the object being deleted.
        kind: ResourceKind,
        /// Remote identifier.
        id: u64,
    },
    /// Adopt the existing remote object `id` into state.
    Import {
        /// Target resource.
        address: ResourceAddress,
        /// Kind the object is expected to have.
        kind: ResourceKind,
        /// Remote identifier.
        id: u64,
    },
}

/// Operation kinds, for counting and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// See [`Operation::Create`].
    Create,
    /// See [`Operation::Update`].
    Update,
    /// See [`Operation::Delete`].
    Delete,
    /// See [`Operation::Import`].
    Import,
}

/// One differing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Field name (`name`, `labels`, `rules`, `ip_range`).
    pub field: String,
    /// Recorded value.
    pub old: Option<String>,
    /// Desired value.
    pub new: Option<String>,
    /// Rule-level detail for the `rules` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleSetChange>,
}

/// Rule-level differences between two firewall rule sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSetChange {
    /// Keys only present in the desired set.
    pub added: Vec<RuleKey>,
    /// Keys only present in the recorded set.
    pub removed: Vec<RuleKey>,
    /// Keys present in both whose CIDR lists differ.
    pub modified: Vec<RuleKey>,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource address.
    pub address: ResourceAddress,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Operations that resolve the difference, in execution order.
    pub operations: Vec<Operation>,
    /// Recorded hash (if any).
    pub old_hash: Option<String>,
    /// Desired hash (absent for orphans).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs an in-place update.
    Update,
    /// Resource must be deleted and created again.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Complete diff result.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// All resource diffs, declared resources first, orphans last.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the operations that turn `state` into `intent`.
    ///
    /// - no state: one `Create`
    /// - equal hashes or no field difference: nothing
    /// - kind change or network `ip_range` change: `Delete` then `Create`
    /// - anything else: one `Update` carrying the full target
    #[must_use]
    pub fn diff(
        &self,
        address: &ResourceAddress,
        intent: &ResourceIntent,
        state: Option<&ResourceState>,
    ) -> Vec<Operation> {
        let Some(state) = state else {
            debug!("{address} has no recorded state, creating");
            return vec![Operation::Create {
                address: address.clone(),
                intent: intent.clone(),
            }];
        };

        if state.kind != intent.kind() {
            debug!("{address} changed kind ({} -> {}), replacing", state.kind, intent.kind());
            return Self::replace(address, intent, state);
        }

        let new_hash = self.hasher.hash_intent(intent);
        if ConfigHasher::hashes_match(&state.config_hash, &new_hash) {
            debug!("{address} is up to date");
            return Vec::new();
        }

        let changes = field_changes(&state.attributes, intent);
        if changes.is_empty() {
            return Vec::new();
        }

        if changes.iter().any(|c| c.field == "ip_range") {
            debug!("{address} changed ip_range, replacing");
            return Self::replace(address, intent, state);
        }

        debug!("{address} needs update ({} fields)", changes.len());
        vec![Operation::Update {
            address: address.clone(),
            id: state.id,
            target: intent.clone(),
            changes,
        }]
    }

    fn replace(
        address: &ResourceAddress,
        intent: &ResourceIntent,
        state: &ResourceState,
    ) -> Vec<Operation> {
        vec![
            Operation::Delete {
                address: address.clone(),
                kind: state.kind,
                id: state.id,
            },
            Operation::Create {
                address: address.clone(),
                intent: intent.clone(),
            },
        ]
    }

    /// Returns a `Delete` for every state entry the document no longer declares.
    #[must_use]
    pub fn orphaned(
        &self,
        config: &ValidatedConfig,
        state: &[(ResourceAddress, ResourceState)],
    ) -> Vec<Operation> {
        state
            .iter()
            .filter(|(address, _)| config.resource(address).is_none())
            .map(|(address, entry)| {
                debug!("Found orphaned resource: {address}");
                Operation::Delete {
                    address: address.clone(),
                    kind: entry.kind,
                    id: entry.id,
                }
            })
            .collect()
    }

    /// Computes diffs for a whole document.
    #[must_use]
    pub fn compute(
        &self,
        config: &ValidatedConfig,
        state: &[(ResourceAddress, ResourceState)],
    ) -> DiffResult {
        let by_address: BTreeMap<&ResourceAddress, &ResourceState> =
            state.iter().map(|(address, entry)| (address, entry)).collect();

        let mut diffs = Vec::with_capacity(config.resources.len());

        for resource in &config.resources {
            let recorded = by_address.get(&resource.address).copied();
            let operations = self.diff(&resource.address, &resource.intent, recorded);
            diffs.push(ResourceDiff {
                address: resource.address.clone(),
                diff_type: DiffType::of(&operations),
                operations,
                old_hash: recorded.map(|s| s.config_hash.clone()),
                new_hash: Some(self.hasher.hash_intent(&resource.intent)),
            });
        }

        for operation in self.orphaned(config, state) {
            let address = operation.address().clone();
            diffs.push(ResourceDiff {
                old_hash: by_address.get(&address).map(|s| s.config_hash.clone()),
                address,
                diff_type: DiffType::Delete,
                operations: vec![operation],
                new_hash: None,
            });
        }

        DiffResult::from_diffs(diffs)
    }

    /// Returns the operation adopting remote object `id` under `address`.
    #[must_use]
    pub fn import(&self, address: &ResourceAddress, id: u64) -> Operation {
        Operation::Import {
            address: address.clone(),
            kind: address.kind,
            id,
        }
    }

    /// Returns the operation list of a destroy: every recorded entry deleted.
    #[must_use]
    pub fn destroy(&self, state: &[(ResourceAddress, ResourceState)]) -> DiffResult {
        let diffs = state
            .iter()
            .map(|(address, entry)| ResourceDiff {
                address: address.clone(),
                diff_type: DiffType::Delete,
                operations: vec![Operation::Delete {
                    address: address.clone(),
                    kind: entry.kind,
                    id: entry.id,
                }],
                old_hash: Some(entry.config_hash.clone()),
                new_hash: None,
            })
            .collect();

        DiffResult::from_diffs(diffs)
    }
}

/// Lists the fields on which `old` and `new` differ.
#[must_use]
pub fn field_changes(old: &ResourceIntent, new: &ResourceIntent) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if old.name() != new.name() {
        changes.push(FieldChange::scalar("name", old.name(), new.name()));
    }

    if old.labels() != new.labels() {
        changes.push(FieldChange::scalar(
            "labels",
            render_labels(old.labels()),
            render_labels(new.labels()),
        ));
    }

    match (old, new) {
        (ResourceIntent::Firewall(old_fw), ResourceIntent::Firewall(new_fw)) => {
            let rules = rule_changes(old_fw, new_fw);
            if !rules.is_empty() {
                changes.push(FieldChange {
                    field: String::from("rules"),
                    old: Some(format!("{} rules", old_fw.rules.len())),
                    new: Some(format!("{} rules", new_fw.rules.len())),
                    rules: Some(rules),
                });
            }
        }
        (ResourceIntent::Network(old_net), ResourceIntent::Network(new_net)) => {
            if old_net.ip_range != new_net.ip_range {
                changes.push(FieldChange::scalar(
                    "ip_range",
                    old_net.ip_range.to_string(),
                    new_net.ip_range.to_string(),
                ));
            }
        }
        _ => changes.push(FieldChange::scalar("kind", old.kind().to_string(), new.kind().to_string())),
    }

    changes
}

/// Compares two rule sets by key; CIDR lists of matching rules compare positionally.
#[must_use]
pub fn rule_changes(old: &FirewallIntent, new: &FirewallIntent) -> RuleSetChange {
    let old_rules = old.rules_by_key();
    let new_rules = new.rules_by_key();

    let mut change = RuleSetChange::default();

    for (key, new_rule) in &new_rules {
        match old_rules.get(key) {
            None => change.added.push(key.clone()),
            Some(old_rule) => {
                if old_rule.source_ips != new_rule.source_ips
                    || old_rule.destination_ips != new_rule.destination_ips
                {
                    change.modified.push(key.clone());
                }
            }
        }
    }

    change.removed = old_rules
        .keys()
        .filter(|key| !new_rules.contains_key(*key))
        .cloned()
        .collect();

    change
}

fn render_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl FieldChange {
    fn scalar(field: &str, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            old: Some(old.into()),
            new: Some(new.into()),
            rules: None,
        }
    }
}

impl RuleSetChange {
    /// Returns true if both rule sets are equivalent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl Operation {
    /// Resource this operation targets.
    #[must_use]
    pub const fn address(&self) -> &ResourceAddress {
        match self {
            Self::Create { address, .. }
            | Self::Update { address, .. }
            | Self::Delete { address, .. }
            | Self::Import { address, .. } => address,
        }
    }

    /// Operation kind.
    #[must_use]
    pub const fn op_type(&self) -> OperationType {
        match self {
            Self::Create { .. } => OperationType::Create,
            Self::Update { .. } => OperationType::Update,
            Self::Delete { .. } => OperationType::Delete,
            Self::Import { .. } => OperationType::Import,
        }
    }
}

impl DiffType {
    /// Classifies an operation list produced by [`DiffEngine::diff`].
    #[must_use]
    pub fn of(operations: &[Operation]) -> Self {
        match operations {
            [] => Self::NoChange,
            [Operation::Create { .. }] => Self::Create,
            [Operation::Delete { .. }] => Self::Delete,
            [Operation::Delete { .. }, Operation::Create { .. }] => Self::Replace,
            _ => Self::Update,
        }
    }
}

impl DiffResult {
    /// Builds the summary counts for a list of diffs.
    #[must_use]
    pub fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();

        Self {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of changed resources.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { address, .. } => write!(f, "create {address}"),
            Self::Update {
                address, changes, ..
            } => {
                write!(f, "update {address}")?;
                if !changes.is_empty() {
                    let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                    write!(f, " ({})", fields.join(", "))?;
                }
                Ok(())
            }
            Self::Delete { address, id, .. } => write!(f, "delete {address} (id {id})"),
            Self::Import { address, id, .. } => write!(f, "import {address} (id {id})"),
        }
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self.old.as_deref().unwrap_or("-");
        let new = self.new.as_deref().unwrap_or("-");
        write!(f, "{}: {old} -> {new}", self.field)
    }
}

impl fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.diff_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, FirewallRule, NetworkIntent, Port, Protocol};
    use ipnetwork::IpNetwork;

    fn rule(direction: Direction, protocol: Protocol, port: Option<Port>, ips: &[&str], description: &str) -> FirewallRule {
        let ips: Vec<IpNetwork> = ips.iter().map(|s| s.parse::<IpNetwork>().unwrap()).collect();
        let (source_ips, destination_ips) = match direction {
            Direction::In => (ips, vec![]),
            Direction::Out => (vec![], ips),
        };
        FirewallRule {
            direction,
            protocol,
            port,
            source_ips,
            destination_ips,
            description: Some(description.to_string()),
        }
    }

    fn firewall(rules: Vec<FirewallRule>) -> ResourceIntent {
        ResourceIntent::Firewall(FirewallIntent::new("basic-firewall", BTreeMap::new(), rules))
    }

    fn network(range: &str) -> ResourceIntent {
        ResourceIntent::Network(NetworkIntent {
            name: String::from("private"),
            labels: BTreeMap::new(),
            ip_range: range.parse().unwrap(),
        })
    }

    fn applied(id: u64, intent: &ResourceIntent) -> ResourceState {
        ResourceState::new(id, intent.clone(), ConfigHasher::new().hash_intent(intent))
    }

    fn address(s: &str) -> ResourceAddress {
        s.parse().unwrap()
    }

    fn http_in(ips: &[&str]) -> FirewallRule {
        rule(Direction::In, Protocol::Tcp, Some(Port::Single(80)), ips, "allow http in")
    }

    #[test]
    fn test_no_state_creates() {
        let engine = DiffEngine::new();
        let intent = firewall(vec![http_in(&["0.0.0.0/0"])]);
        let addr = address("hcloud_firewall.web");

        let ops = engine.diff(&addr, &intent, None);

        assert_eq!(
            ops,
            vec![Operation::Create {
                address: addr,
                intent
            }]
        );
    }

    #[test]
    fn test_applied_state_is_a_fixed_point() {
        let engine = DiffEngine::new();
        let intent = firewall(vec![http_in(&["0.0.0.0/0", "::/0"])]);
        let state = applied(1, &intent);

        assert!(engine.diff(&address("hcloud_firewall.web"), &intent, Some(&state)).is_empty());
    }

    #[test]
    fn test_rule_order_is_not_a_change() {
        let engine = DiffEngine::new();
        let a = http_in(&["0.0.0.0/0"]);
        let b = rule(Direction::Out, Protocol::Udp, Some(Port::Any), &["10.0.0.0/8"], "dns");
        let state = applied(1, &firewall(vec![a.clone(), b.clone()]));

        let ops = engine.diff(&address("hcloud_firewall.web"), &firewall(vec![b, a]), Some(&state));
        assert!(ops.is_empty());
    }

    #[test]
    fn test_cidr_reversal_is_an_update() {
        let engine = DiffEngine::new();
        let state = applied(5, &firewall(vec![http_in(&["0.0.0.0/0", "::/0"])]));
        let target = firewall(vec![http_in(&["::/0", "0.0.0.0/0"])]);

        let ops = engine.diff(&address("hcloud_firewall.web"), &target, Some(&state));

        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Update { id, changes, target: t, .. } => {
                assert_eq!(*id, 5);
                assert_eq!(t, &target);
                let rules = changes[0].rules.as_ref().unwrap();
                assert_eq!(rules.modified.len(), 1);
                assert!(rules.added.is_empty() && rules.removed.is_empty());
            }
            other => panic!("expected update, got {other}"),
        }
    }

    #[test]
    fn test_port_change_is_add_plus_remove_in_one_update() {
        let engine = DiffEngine::new();
        let state = applied(5, &firewall(vec![http_in(&["0.0.0.0/0"])]));
        let mut changed = http_in(&["0.0.0.0/0"]);
        changed.port = Some(Port::Single(443));

        let ops = engine.diff(&address("hcloud_firewall.web"), &firewall(vec![changed]), Some(&state));

        assert_eq!(ops.len(), 1);
        let Operation::Update { changes, .. } = &ops[0] else {
            panic!("expected update");
        };
        let rules = changes[0].rules.as_ref().unwrap();
        assert_eq!(rules.added.len(), 1);
        assert_eq!(rules.removed.len(), 1);
    }

    #[test]
    fn test_label_change_is_an_update() {
        let engine = DiffEngine::new();
        let state = applied(1, &network("10.0.0.0/16"));
        let mut intent = network("10.0.0.0/16");
        if let ResourceIntent::Network(net) = &mut intent {
            net.labels.insert(String::from("env"), String::from("prod"));
        }

        let ops = engine.diff(&address("hcloud_network.private"), &intent, Some(&state));
        assert_eq!(DiffType::of(&ops), DiffType::Update);
    }

    #[test]
    fn test_ip_range_change_replaces() {
        let engine = DiffEngine::new();
        let state = applied(9, &network("10.0.0.0/16"));
        let addr = address("hcloud_network.private");

        let ops = engine.diff(&addr, &network("10.1.0.0/16"), Some(&state));

        assert_eq!(DiffType::of(&ops), DiffType::Replace);
        assert_eq!(
            ops[0],
            Operation::Delete {
                address: addr,
                kind: ResourceKind::Network,
                id: 9
            }
        );
    }

    #[test]
    fn test_compute_counts_and_orphans() {
        let engine = DiffEngine::new();
        let kept = firewall(vec![http_in(&["0.0.0.0/0"])]);
        let config = ValidatedConfig {
            state: crate::config::StateConfig::default(),
            settings: crate::config::Settings::default(),
            resources: vec![
                crate::config::DesiredResource {
                    address: address("hcloud_firewall.web"),
                    intent: kept.clone(),
                },
                crate::config::DesiredResource {
                    address: address("hcloud_network.private"),
                    intent: network("10.0.0.0/16"),
                },
            ],
            warnings: vec![],
        };
        let state = vec![
            (address("hcloud_firewall.old"), applied(3, &kept)),
            (address("hcloud_firewall.web"), applied(1, &kept)),
        ];

        let result = engine.compute(&config, &state);

        assert_eq!(result.creates, 1);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.deletes, 1);
        assert_eq!(result.total_changes(), 2);
        assert_eq!(result.diffs[2].address, address("hcloud_firewall.old"));
        assert_eq!(result.actionable_diffs().len(), 2);
    }
}
