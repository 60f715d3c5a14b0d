//! Validation of declaration documents.
//!
//! Validation turns the loosely typed document into [`DesiredResource`]s.
//! Every check reports the field path it failed on, and the validator never
//! performs I/O.

use crate::error::{ConfigError, HcloudError, Result};
use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use validator::Validate;

use super::intent::{
    Direction, FirewallIntent, FirewallRule, NetworkIntent, Port, Protocol, ResourceAddress,
    ResourceIntent, ResourceKind, RuleKey, collapse_duplicate_rules,
};
use super::spec::{
    DeclarationFile, FirewallConfig, NetworkConfig, ResourceConfig, RuleConfig, Settings,
    StateConfig,
};

/// Validator for declaration documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigValidator {
    /// Reject duplicate rule keys even when the document does not ask for it.
    strict_rules: bool,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

/// A resource that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredResource {
    /// Identity of the resource.
    pub address: ResourceAddress,
    /// Desired attributes.
    pub intent: ResourceIntent,
}

/// A fully validated document.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    /// State backend configuration.
    pub state: StateConfig,
    /// Engine settings.
    pub settings: Settings,
    /// Resources in declaration order.
    pub resources: Vec<DesiredResource>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl ValidatedConfig {
    /// Looks up a declared resource by address.
    #[must_use]
    pub fn resource(&self, address: &ResourceAddress) -> Option<&DesiredResource> {
        self.resources.iter().find(|r| r.address == *address)
    }

    /// Addresses of all declared resources.
    #[must_use]
    pub fn addresses(&self) -> Vec<&ResourceAddress> {
        self.resources.iter().map(|r| &r.address).collect()
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strict_rules: false,
        }
    }

    /// Forces strict duplicate-rule handling.
    #[must_use]
    pub const fn with_strict_rules(mut self, strict: bool) -> Self {
        self.strict_rules = strict;
        self
    }

    /// Validates a document, failing on the first error found.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the offending field.
    pub fn validate(&self, file: &DeclarationFile) -> Result<ValidatedConfig> {
        let (resources, result) = self.check(file);

        if let Some(first_error) = result.errors.first() {
            return Err(HcloudError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        for warning in &result.warnings {
            warn!("{warning}");
        }
        debug!("Configuration validation passed ({} resources)", resources.len());

        Ok(ValidatedConfig {
            state: file.state.clone(),
            settings: file.settings.clone(),
            resources,
            warnings: result.warnings,
        })
    }

    /// Runs every check and collects all errors and warnings.
    ///
    /// Resources that failed validation are left out of the returned list.
    #[must_use]
    pub fn check(&self, file: &DeclarationFile) -> (Vec<DesiredResource>, ValidationResult) {
        let mut result = ValidationResult::default();
        let strict = self.strict_rules || file.settings.strict_rules;

        Self::validate_settings(&file.settings, &mut result);

        if file.resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
        }

        let mut seen = HashSet::new();
        let mut resources = Vec::with_capacity(file.resources.len());

        for (i, resource) in file.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            let Some(kind) = ResourceKind::from_type_name(&resource.resource_type) else {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.type"),
                    message: format!("Unknown resource type '{}'", resource.resource_type),
                });
                continue;
            };

            if !is_valid_name(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Instance name '{}' is invalid. Must be lowercase alphanumeric with '-' or '_', starting with a letter.",
                        resource.name
                    ),
                });
                continue;
            }

            let address = ResourceAddress::new(kind, &resource.name);
            if !seen.insert(address.clone()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate {} name: {}", kind, resource.name),
                });
                continue;
            }

            let before = result.errors.len();
            let intent = Self::resource_intent(kind, resource, &prefix, strict, &mut result);
            if let Some(intent) = intent
                && result.errors.len() == before
            {
                resources.push(DesiredResource { address, intent });
            }
        }

        (resources, result)
    }

    /// Decodes and validates a single resource entry.
    ///
    /// # Errors
    ///
    /// Returns the first validation error for the entry.
    pub fn parse_resource(&self, resource: &ResourceConfig) -> Result<DesiredResource> {
        let file = DeclarationFile {
            resources: vec![resource.clone()],
            settings: Settings {
                strict_rules: self.strict_rules,
                ..Settings::default()
            },
            ..DeclarationFile::default()
        };
        let mut config = self.validate(&file)?;
        config
            .resources
            .pop()
            .ok_or_else(|| HcloudError::internal("validated resource list is empty"))
    }

    fn validate_settings(settings: &Settings, result: &mut ValidationResult) {
        if settings.concurrency == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.concurrency"),
                message: String::from("Concurrency must be at least 1"),
            });
        }

        if settings.retry.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.retry.max_attempts"),
                message: String::from("At least one attempt is required"),
            });
        }

        if settings.retry.base_delay_ms > settings.retry.max_delay_ms {
            result.errors.push(ValidationError {
                field: String::from("settings.retry.base_delay_ms"),
                message: String::from("Base delay cannot exceed max_delay_ms"),
            });
        }
    }

    fn resource_intent(
        kind: ResourceKind,
        resource: &ResourceConfig,
        prefix: &str,
        strict: bool,
        result: &mut ValidationResult,
    ) -> Option<ResourceIntent> {
        let field = format!("{prefix}.attributes");

        if resource.attributes.is_null() {
            result.errors.push(ValidationError {
                field,
                message: format!("{kind} requires attributes"),
            });
            return None;
        }

        match kind {
            ResourceKind::Firewall => {
                let config: FirewallConfig = decode_attributes(resource, &field, result)?;
                validate_lengths(&config, &field, result);
                Self::firewall_intent(config, &field, strict, result).map(ResourceIntent::Firewall)
            }
            ResourceKind::Network => {
                let config: NetworkConfig = decode_attributes(resource, &field, result)?;
                validate_lengths(&config, &field, result);
                Self::network_intent(config, &field, result).map(ResourceIntent::Network)
            }
        }
    }

    fn firewall_intent(
        config: FirewallConfig,
        prefix: &str,
        strict: bool,
        result: &mut ValidationResult,
    ) -> Option<FirewallIntent> {
        let mut rules = Vec::with_capacity(config.rules.len());
        let mut first_seen: BTreeMap<RuleKey, usize> = BTreeMap::new();
        let mut valid = true;

        for (i, rule) in config.rules.iter().enumerate() {
            let field = format!("{prefix}.rules[{i}]");
            let Some(rule) = Self::firewall_rule(rule, &field, result) else {
                valid = false;
                continue;
            };

            if let Some(earlier) = first_seen.insert(rule.key(), i) {
                if strict {
                    result.errors.push(ValidationError {
                        field: field.clone(),
                        message: format!(
                            "Duplicate rule {} (also declared at rules[{earlier}])",
                            rule.key()
                        ),
                    });
                    valid = false;
                } else {
                    result.warnings.push(format!(
                        "{field}: rule {} duplicates rules[{earlier}]; the later declaration wins",
                        rule.key()
                    ));
                }
            }

            rules.push(rule);
        }

        if !valid {
            return None;
        }

        let (rules, _) = collapse_duplicate_rules(rules);
        Some(FirewallIntent {
            name: config.name,
            labels: config.labels,
            rules,
        })
    }

    fn firewall_rule(
        rule: &RuleConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) -> Option<FirewallRule> {
        let before = result.errors.len();

        let direction = rule
            .direction
            .parse::<Direction>()
            .map_err(|message| {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.direction"),
                    message,
                });
            })
            .ok();

        let protocol = rule
            .protocol
            .parse::<Protocol>()
            .map_err(|message| {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.protocol"),
                    message,
                });
            })
            .ok();

        let port = match (&rule.port, protocol) {
            (Some(value), Some(protocol)) if !protocol.takes_port() => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.port"),
                    message: format!("Port '{value}' is not allowed for protocol {protocol}"),
                });
                None
            }
            (None, Some(protocol)) if protocol.takes_port() => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.port"),
                    message: format!("Protocol {protocol} requires a port"),
                });
                None
            }
            (Some(value), _) => value
                .to_string()
                .parse::<Port>()
                .map_err(|message| {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.port"),
                        message,
                    });
                })
                .ok(),
            (None, _) => None,
        };

        let source_ips = parse_cidrs(&rule.source_ips, &format!("{prefix}.source_ips"), result);
        let destination_ips =
            parse_cidrs(&rule.destination_ips, &format!("{prefix}.destination_ips"), result);

        if let Some(direction) = direction {
            let (required, forbidden, required_name, forbidden_name) = match direction {
                Direction::In => (&rule.source_ips, &rule.destination_ips, "source_ips", "destination_ips"),
                Direction::Out => (&rule.destination_ips, &rule.source_ips, "destination_ips", "source_ips"),
            };
            if required.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.{required_name}"),
                    message: format!("'{direction}' rules need at least one entry in {required_name}"),
                });
            }
            if !forbidden.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.{forbidden_name}"),
                    message: format!("'{direction}' rules cannot set {forbidden_name}"),
                });
            }
        }

        if result.errors.len() != before {
            return None;
        }

        Some(FirewallRule {
            direction: direction?,
            protocol: protocol?,
            port,
            source_ips,
            destination_ips,
            // The API reports an empty description as absent.
            description: rule.description.clone().filter(|d| !d.is_empty()),
        })
    }

    fn network_intent(
        config: NetworkConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) -> Option<NetworkIntent> {
        let field = format!("{prefix}.ip_range");
        let ip_range = match config.ip_range.parse::<Ipv4Network>() {
            Ok(range) => range,
            Err(e) => {
                result.errors.push(ValidationError {
                    field,
                    message: format!("'{}' is not an IPv4 CIDR: {e}", config.ip_range),
                });
                return None;
            }
        };

        if ip_range.ip() != ip_range.network() {
            result.errors.push(ValidationError {
                field,
                message: format!(
                    "'{}' has host bits set; did you mean {}/{}?",
                    config.ip_range,
                    ip_range.network(),
                    ip_range.prefix()
                ),
            });
            return None;
        }

        Some(NetworkIntent {
            name: config.name,
            labels: config.labels,
            ip_range,
        })
    }
}

fn decode_attributes<T: serde::de::DeserializeOwned>(
    resource: &ResourceConfig,
    field: &str,
    result: &mut ValidationResult,
) -> Option<T> {
    serde_yaml::from_value(resource.attributes.clone())
        .map_err(|e| {
            result.errors.push(ValidationError {
                field: field.to_string(),
                message: e.to_string(),
            });
        })
        .ok()
}

fn validate_lengths<T: Validate>(config: &T, prefix: &str, result: &mut ValidationResult) {
    if let Err(errors) = config.validate() {
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string);
                result.errors.push(ValidationError {
                    field: format!("{prefix}.{field}"),
                    message,
                });
            }
        }
    }
}

fn parse_cidrs(values: &[String], prefix: &str, result: &mut ValidationResult) -> Vec<IpNetwork> {
    let mut networks = Vec::with_capacity(values.len());

    for (i, value) in values.iter().enumerate() {
        match value.parse::<IpNetwork>() {
            Ok(network) if network.ip() != network.network() => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}[{i}]"),
                    message: format!(
                        "'{value}' has host bits set; did you mean {}/{}?",
                        network.network(),
                        network.prefix()
                    ),
                });
            }
            Ok(network) => networks.push(network),
            Err(e) => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}[{i}]"),
                    message: format!("'{value}' is not a valid CIDR: {e}"),
                });
            }
        }
    }

    networks
}

/// Validates that an instance name follows the naming convention.
/// Names must be lowercase alphanumeric with `-` or `_`, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn load(yaml: &str) -> DeclarationFile {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn firewall_doc(rules: &str) -> DeclarationFile {
        load(&format!(
            r"
resources:
  - type: hcloud_firewall
    name: web
    attributes:
      name: basic-firewall
      rules:
{rules}
"
        ))
    }

    fn expect_field(file: &DeclarationFile, field: &str) {
        let err = ConfigValidator::new().validate(file).unwrap_err();
        match err {
            HcloudError::Config(config_err) => assert_eq!(config_err.field(), Some(field)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("web-fw_2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("1web"));
        assert!(!is_valid_name("web.fw"));
    }

    #[test]
    fn test_valid_firewall() {
        let file = firewall_doc(
            r#"
        - { direction: in, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0", "::/0"], description: allow http in }
        - { direction: out, protocol: tcp, port: "80", destination_ips: ["0.0.0.0/0"], description: allow http out }
        - { direction: in, protocol: icmp, source_ips: ["10.0.0.0/8"] }
"#,
        );

        let config = ConfigValidator::new().validate(&file).unwrap();
        assert_eq!(config.resources.len(), 1);

        let fw = config.resources[0].intent.as_firewall().unwrap();
        assert_eq!(fw.name, "basic-firewall");
        assert_eq!(fw.rules.len(), 3);
        assert_eq!(fw.rules[0].direction, Direction::In);
        assert_eq!(fw.rules[0].port, Some(Port::Single(80)));
        assert_eq!(fw.rules[0].source_ips[1].to_string(), "::/0");
        assert_eq!(fw.rules[2].protocol, Protocol::Icmp);
        assert_eq!(fw.rules[2].port, None);
    }

    #[test]
    fn test_unknown_protocol_names_field() {
        let file = firewall_doc(
            r#"
        - { direction: in, protocol: tcp, port: "22", source_ips: ["0.0.0.0/0"] }
        - { direction: in, protocol: sctp, port: "22", source_ips: ["0.0.0.0/0"] }
"#,
        );
        expect_field(&file, "resources[0].attributes.rules[1].protocol");
    }

    #[test]
    fn test_port_rules() {
        let missing = firewall_doc(r#"        - { direction: in, protocol: udp, source_ips: ["0.0.0.0/0"] }"#);
        expect_field(&missing, "resources[0].attributes.rules[0].port");

        let forbidden =
            firewall_doc(r#"        - { direction: in, protocol: gre, port: "80", source_ips: ["0.0.0.0/0"] }"#);
        expect_field(&forbidden, "resources[0].attributes.rules[0].port");

        let malformed =
            firewall_doc(r#"        - { direction: in, protocol: tcp, port: "any,80", source_ips: ["0.0.0.0/0"] }"#);
        expect_field(&malformed, "resources[0].attributes.rules[0].port");
    }

    #[test]
    fn test_direction_requires_matching_ips() {
        let file = firewall_doc(r#"        - { direction: out, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0"] }"#);
        expect_field(&file, "resources[0].attributes.rules[0].destination_ips");
    }

    #[test]
    fn test_cidr_with_host_bits_rejected() {
        let file = firewall_doc(
            r#"        - { direction: in, protocol: tcp, port: "80", source_ips: ["10.0.0.0/8", "192.168.1.5/24"] }"#,
        );
        expect_field(&file, "resources[0].attributes.rules[0].source_ips[1]");
    }

    #[test]
    fn test_duplicate_rules_collapse_with_warning() {
        let file = firewall_doc(
            r#"
        - { direction: in, protocol: tcp, port: "80", source_ips: ["10.0.0.0/8"], description: web }
        - { direction: in, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0"], description: web }
"#,
        );

        let config = ConfigValidator::new().validate(&file).unwrap();
        let fw = config.resources[0].intent.as_firewall().unwrap();
        assert_eq!(fw.rules.len(), 1);
        assert_eq!(fw.rules[0].source_ips[0].to_string(), "0.0.0.0/0");
        assert_eq!(config.warnings.len(), 1);

        let strict = ConfigValidator::new().with_strict_rules(true);
        assert!(strict.validate(&file).is_err());
    }

    #[test]
    fn test_empty_description_is_absent() {
        let file = firewall_doc(
            r#"
        - { direction: in, protocol: tcp, port: "22", source_ips: ["0.0.0.0/0"], description: "" }
        - { direction: in, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0"] }
"#,
        );

        let config = ConfigValidator::new().validate(&file).unwrap();
        let fw = config.resources[0].intent.as_firewall().unwrap();
        assert_eq!(fw.rules[0].description, None);
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_network_range_must_be_ipv4() {
        let file = load(
            r"
resources:
  - type: hcloud_network
    name: private
    attributes:
      name: private
      ip_range: fd00::/8
",
        );
        expect_field(&file, "resources[0].attributes.ip_range");
    }

    #[test]
    fn test_unknown_type_and_duplicate_names() {
        let file = load(
            r"
resources:
  - type: hcloud_volume
    name: data
    attributes: { name: data }
",
        );
        expect_field(&file, "resources[0].type");

        let file = load(
            r"
resources:
  - type: hcloud_network
    name: private
    attributes: { name: a, ip_range: 10.0.0.0/16 }
  - type: hcloud_network
    name: private
    attributes: { name: b, ip_range: 10.1.0.0/16 }
",
        );
        expect_field(&file, "resources[1].name");
    }

    #[test]
    fn test_firewall_name_too_long() {
        let file = load(&format!(
            r"
resources:
  - type: hcloud_firewall
    name: web
    attributes:
      name: {}
",
            "a".repeat(64)
        ));
        expect_field(&file, "resources[0].attributes.name");
    }

    #[test]
    fn test_check_collects_every_error() {
        let file = firewall_doc(
            r#"
        - { direction: sideways, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0"] }
        - { direction: in, protocol: tcp, port: "99999", source_ips: ["0.0.0.0/0"] }
"#,
        );
        let (resources, result) = ConfigValidator::new().check(&file);
        assert!(resources.is_empty());
        assert_eq!(result.error_count(), 2);
    }
}
