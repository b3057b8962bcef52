//! Configuration loading
//!
//! Configuration is a single YAML document. `discover()` looks at the
//! `PLM_CONFIG` environment variable, then the platform config directory,
//! and falls back to defaults when neither exists.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::error::{PlmError, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PLM_CONFIG";

/// Special database location for a private in-memory store
pub const IN_MEMORY: &str = ":memory:";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub filter: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "plm=info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database file
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`
    pub database: String,

    /// Root directory of the file vault
    pub vault: PathBuf,

    pub log: LogConfig,

    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".plm"));
        Self {
            database: data_dir.join("plm.db").to_string_lossy().into_owned(),
            vault: data_dir.join("vault"),
            log: LogConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "plm")
}

impl Config {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml).map_err(|e| PlmError::Config {
            message: e.to_string(),
        })
    }

    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PlmError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_yaml(&contents)
    }

    /// Locate and load the active configuration
    pub fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        if let Some(dirs) = project_dirs() {
            let path = dirs.config_dir().join("config.yaml");
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }

    /// Configuration for a throwaway in-memory store
    pub fn in_memory() -> Self {
        Self {
            database: IN_MEMORY.to_string(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == IN_MEMORY
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yml::to_string(self).map_err(|e| PlmError::Config {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml(
            r#"
database: ":memory:"
log:
  format: pretty
"#,
        )
        .unwrap();

        assert!(config.is_in_memory());
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.filter, "plm=info");
        assert_eq!(config.store.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "database: /srv/plm/plm.db\nvault: /srv/plm/vault\nstore:\n  busy_timeout_ms: 250\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, "/srv/plm/plm.db");
        assert_eq!(config.vault, PathBuf::from("/srv/plm/vault"));
        assert_eq!(config.store.busy_timeout_ms, 250);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Config::from_yaml("log: [unclosed").unwrap_err();
        assert!(matches!(err, PlmError::Config { .. }));

        let err = Config::load(Path::new("/nonexistent/plm.yaml")).unwrap_err();
        assert!(matches!(err, PlmError::Config { .. }));
    }
}
