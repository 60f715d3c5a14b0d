//! Configuration parser for loading declaration documents.
//!
//! This module handles loading the YAML document and environment variables,
//! with proper precedence and error handling.

use crate::error::{ConfigError, HcloudError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeclarationFile;
use super::validator::{ConfigValidator, ValidatedConfig};

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "HCLOUD_TOKEN";

/// Environment variable overriding the API base URL.
pub const ENDPOINT_ENV: &str = "HCLOUD_ENDPOINT";

/// Environment variable overriding `state.path`.
pub const STATE_PATH_ENV: &str = "HCLOUD_RECONCILE_STATE_PATH";

/// Configuration parser for loading declaration documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeclarationFile> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HcloudError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HcloudError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeclarationFile> {
        debug!("Parsing YAML configuration");

        let file: DeclarationFile = serde_yaml::from_str(content).map_err(|e| {
            let location = source
                .map(|p| p.display().to_string())
                .or_else(|| e.location().map(|l| format!("line {}, column {}", l.line(), l.column())));
            HcloudError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed {} resource declarations", file.resources.len());
        Ok(file)
    }

    /// Parses and validates a YAML document in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or fails validation.
    pub fn parse_document(&self, content: &str) -> Result<ValidatedConfig> {
        let file = self.parse_yaml(content, None)?;
        ConfigValidator::new().validate(&file)
    }

    /// Loads a document with environment variable overrides.
    ///
    /// `HCLOUD_RECONCILE_STATE_PATH` replaces `state.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeclarationFile> {
        let mut file = self.load_file(path)?;

        Self::apply_env_overrides(&mut file);

        Ok(file)
    }

    fn apply_env_overrides(file: &mut DeclarationFile) {
        if let Ok(path) = std::env::var(STATE_PATH_ENV) {
            debug!("Overriding state.path from environment");
            file.state.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HcloudError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the Hetzner Cloud API token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_hcloud_token() -> Result<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                HcloudError::Config(ConfigError::MissingEnvVar {
                    name: String::from(TOKEN_ENV),
                })
            })
    }

    /// Gets the API endpoint override from environment (optional).
    #[must_use]
    pub fn get_endpoint() -> Option<String> {
        std::env::var(ENDPOINT_ENV).ok().filter(|e| !e.is_empty())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "hcloud.yaml",
    "hcloud.yml",
    "resources.yaml",
    "resources.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HcloudError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::StateBackend;

    #[test]
    fn test_parse_minimal_config() {
        let parser = ConfigParser::new();
        let file = parser.parse_yaml("resources: []", None).unwrap();

        assert!(file.resources.is_empty());
        assert_eq!(file.state.backend, StateBackend::Local);
        assert_eq!(file.settings.concurrency, 4);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
state:
  backend: local
  path: .hcloud
settings:
  concurrency: 2
  retry: { max_attempts: 3, base_delay_ms: 10, max_delay_ms: 100 }
  strict_rules: true
resources:
  - type: hcloud_firewall
    name: web
    attributes:
      name: basic-firewall
      labels: { env: test }
      rules:
        - { direction: in, protocol: tcp, port: "80", source_ips: ["0.0.0.0/0", "::/0"], description: allow http in }
  - type: hcloud_network
    name: private
    attributes:
      name: private-net
      ip_range: 10.0.0.0/16
"#;
        let parser = ConfigParser::new();
        let file = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(file.state.path.as_deref(), Some(".hcloud"));
        assert_eq!(file.settings.retry.max_attempts, 3);
        assert!(file.settings.strict_rules);
        assert_eq!(file.resource_names(), vec!["web", "private"]);

        let config = parser.parse_document(yaml).unwrap();
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[1].address.to_string(), "hcloud_network.private");
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = ConfigParser::new()
            .parse_yaml("resources: [ { type: hcloud_firewall", None)
            .unwrap_err();
        assert!(matches!(
            err,
            HcloudError::Config(ConfigError::ParseError { location: Some(_), .. })
        ));
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("resources.yml"), "resources: []").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("resources.yml"));
    }
}
