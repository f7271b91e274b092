//! Configuration for the chrooted SFTP service

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Chrooted SFTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Confinement root for all file operations
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Where authorized public keys come from
    #[serde(default)]
    pub key_source: KeySource,

    /// Accept SETSTAT/FSETSTAT as a no-op success instead of rejecting it
    /// (some clients abort uploads when the trailing SETSTAT errors)
    #[serde(default = "default_setstat_compat")]
    pub setstat_compat: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Key-source backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KeySource {
    /// Static mapping from usernames to authorized key file paths
    Mapping {
        /// Username to key file paths
        files: HashMap<String, Vec<PathBuf>>,
    },
    /// The OS account database and per-account `~/.ssh` key files
    #[default]
    System,
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for SIEM integration
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            key_source: KeySource::default(),
            setstat_compat: default_setstat_compat(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Fails when the confinement root is not an existing absolute
    /// directory.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.root_dir.is_absolute() {
            return Err(crate::Error::Config(format!(
                "root_dir must be absolute: {}",
                self.root_dir.display()
            )));
        }

        if !self.root_dir.exists() {
            return Err(crate::Error::Config(format!(
                "root directory does not exist: {}",
                self.root_dir.display()
            )));
        }

        if !self.root_dir.is_dir() {
            return Err(crate::Error::Config(format!(
                "root path is not a directory: {}",
                self.root_dir.display()
            )));
        }

        Ok(())
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/srv/sftp")
}

fn default_setstat_compat() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.root_dir, PathBuf::from("/srv/sftp"));
        assert!(config.setstat_compat);
        assert!(matches!(config.key_source, KeySource::System));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(matches!(config.key_source, KeySource::System));
        assert!(config.setstat_compat);
    }

    #[test]
    fn test_parse_mapping_key_source() {
        let config: Config = toml::from_str(
            r#"
            root_dir = "/srv/drop"
            setstat_compat = false

            [key_source]
            backend = "mapping"

            [key_source.files]
            alice = ["/etc/burrow/keys/alice"]
            "#,
        )
        .unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/srv/drop"));
        assert!(!config.setstat_compat);
        let KeySource::Mapping { files } = &config.key_source else {
            panic!("expected mapping backend");
        };
        assert_eq!(
            files["alice"],
            vec![PathBuf::from("/etc/burrow/keys/alice")]
        );
    }

    #[test]
    fn test_validate_rejects_relative_root() {
        let config = Config {
            root_dir: PathBuf::from("relative/root"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let config = Config {
            root_dir: PathBuf::from("/does/not/exist/anywhere"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
