//! Configuration management for gangway

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port the SSH listener binds to
    pub bind_address: String,

    /// Path to the server host key (generated if missing)
    pub host_key_path: PathBuf,

    /// Files containing authorized client public keys
    pub authorized_keys_paths: Vec<PathBuf>,

    /// Shell used for exec commands and interactive sessions
    pub shell: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            host_key_path: default_config_dir().join("host_key"),
            authorized_keys_paths: vec![PathBuf::from("~/.ssh/authorized_keys")],
            shell: default_shell(),
        }
    }
}

/// Pick the operator's shell, falling back to /bin/sh
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gangway")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:2222");
        assert!(!config.shell.is_empty());
        assert_eq!(
            config.authorized_keys_paths,
            vec![PathBuf::from("~/.ssh/authorized_keys")]
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("bind_address = \"127.0.0.1:2022\"").unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:2022");
        assert!(!config.shell.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ServerConfig::default();
        config.bind_address = "127.0.0.1:2200".to_string();
        config.shell = "/bin/bash".to_string();

        save_config(&path, &config).unwrap();
        let loaded: ServerConfig = load_config(&path).unwrap();

        assert_eq!(loaded.bind_address, "127.0.0.1:2200");
        assert_eq!(loaded.shell, "/bin/bash");
    }

    #[test]
    fn test_load_missing_file() {
        let result: Result<ServerConfig, _> = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
