//! Configuration hashing for change detection.
//!
//! The hash of an intent is the fast path of the diff engine: two intents
//! with the same hash are considered equal. The encoding sorts firewall rules
//! by key, so rule order does not matter, but keeps CIDR lists in declared
//! order, so reordering a CIDR list does.

use sha2::{Digest, Sha256};

use super::intent::{FirewallRule, ResourceIntent};
use super::validator::ValidatedConfig;

/// Field separator in the canonical encoding.
const SEP: [u8; 1] = [0];

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of every resource in a validated document.
    #[must_use]
    pub fn hash_config(&self, config: &ValidatedConfig) -> String {
        let mut hasher = Sha256::new();

        for resource in &config.resources {
            hasher.update(resource.address.to_string().as_bytes());
            hasher.update(SEP);
            hasher.update(self.hash_intent(&resource.intent).as_bytes());
            hasher.update(SEP);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the hash of a single intent.
    #[must_use]
    pub fn hash_intent(&self, intent: &ResourceIntent) -> String {
        let mut hasher = Sha256::new();

        hasher.update(intent.kind().type_name().as_bytes());
        hasher.update(SEP);
        hasher.update(intent.name().as_bytes());
        hasher.update(SEP);

        // BTreeMap iteration is already sorted
        for (key, value) in intent.labels() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(SEP);
        }
        hasher.update(b"|");

        match intent {
            ResourceIntent::Firewall(fw) => {
                let mut rules: Vec<&FirewallRule> = fw.rules.iter().collect();
                rules.sort_by_key(|r| r.key());
                for rule in rules {
                    Self::hash_rule(&mut hasher, rule);
                }
            }
            ResourceIntent::Network(net) => {
                hasher.update(net.ip_range.to_string().as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    fn hash_rule(hasher: &mut Sha256, rule: &FirewallRule) {
        hasher.update(rule.direction.to_string().as_bytes());
        hasher.update(SEP);
        hasher.update(rule.protocol.to_string().as_bytes());
        hasher.update(SEP);
        if let Some(port) = rule.port {
            hasher.update(port.to_string().as_bytes());
        }
        hasher.update(SEP);
        if let Some(description) = &rule.description {
            hasher.update(b"d");
            hasher.update(description.as_bytes());
        }
        hasher.update(SEP);

        // CIDR order is significant
        for ip in &rule.source_ips {
            hasher.update(ip.to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(SEP);
        for ip in &rule.destination_ips {
            hasher.update(ip.to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(b";");
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
