//! Validator configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),
}

/// Configuration shared by both credential validators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shell override; the platform default when unset
    pub shell: Option<String>,

    /// Timeout for each helper command (seconds)
    pub command_timeout_secs: Option<u64>,

    /// Working directory for helper commands
    pub working_dir: Option<String>,

    /// Shadow password file searched on Linux
    pub shadow_file: String,

    /// crypt(3) hash generator on Linux
    pub hash_tool: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shell: None,
            command_timeout_secs: Some(10),
            working_dir: None,
            shadow_file: "/etc/shadow".to_string(),
            hash_tool: "mkpasswd".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    /// Load from a `.json` file, or YAML for any other extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = AuthConfig::default();
        assert_eq!(config.shell, None);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.shadow_file, "/etc/shadow");
        assert_eq!(config.hash_tool, "mkpasswd");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AuthConfig::from_yaml("hash_tool: /usr/local/bin/mkpasswd\n").unwrap();
        assert_eq!(config.hash_tool, "/usr/local/bin/mkpasswd");
        assert_eq!(config.shadow_file, "/etc/shadow");
        assert_eq!(config.command_timeout_secs, Some(10));
    }

    #[test]
    fn test_json_disables_timeout() {
        let config = AuthConfig::from_json(r#"{"command_timeout_secs": null}"#).unwrap();
        assert_eq!(config.command_timeout(), None);
    }

    #[test]
    fn test_invalid_yaml() {
        let result = AuthConfig::from_yaml("command_timeout_secs: [1, 2");
        assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_load_by_extension() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "shell: /bin/bash").unwrap();
        let config = AuthConfig::load(yaml.path()).unwrap();
        assert_eq!(config.shell.as_deref(), Some("/bin/bash"));

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"{{"shadow_file": "/tmp/shadow"}}"#).unwrap();
        let config = AuthConfig::load(json.path()).unwrap();
        assert_eq!(config.shadow_file, "/tmp/shadow");
    }

    #[test]
    fn test_load_missing_file() {
        let result = AuthConfig::load("/nonexistent/host-auth.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
