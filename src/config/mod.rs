//! Desired-state parsing.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing the YAML declaration document
//! - Validation into typed resource intents
//! - Computing intent hashes for change detection

mod hash;
mod intent;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use intent::{
    Direction, FirewallIntent, FirewallRule, KindSpec, NetworkIntent, Port, Protocol,
    RESOURCE_KINDS, ResourceAddress, ResourceIntent, ResourceKind, RuleKey,
    collapse_duplicate_rules,
};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENDPOINT_ENV, STATE_PATH_ENV, TOKEN_ENV, find_config_file,
};
pub use spec::{
    DeclarationFile, FirewallConfig, NetworkConfig, PortValue, ResourceConfig, RetrySettings,
    RuleConfig, Settings, StateBackend, StateConfig,
};
pub use validator::{
    ConfigValidator, DesiredResource, ValidatedConfig, ValidationError, ValidationResult,
};
