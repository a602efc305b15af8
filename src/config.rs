//! # Configuration
//!
//! TOML configuration file, with environment and command-line overrides.
//!
//! ```toml
//! database = "./app.db"
//! revisions_dir = "./revisions"
//! allow_multiple_heads = false
//! version_table = "aeromigrate_version"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Precedence, lowest first: file, `AEROMIGRATE_*` environment variables,
//! command-line flags. Validation runs after every override is applied.

use crate::config_validator::{format_validation_errors, ConfigValidationError, ConfigValidator};
use crate::migrations::graph::HeadPolicy;
use crate::migrations::sqlite::DEFAULT_VERSION_TABLE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./aeromigrate.toml";
pub const ENV_DATABASE: &str = "AEROMIGRATE_DATABASE";
pub const ENV_REVISIONS_DIR: &str = "AEROMIGRATE_REVISIONS_DIR";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config TOML in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path (required, unless supplied by override)
    #[serde(default)]
    pub database: PathBuf,

    #[serde(default = "default_revisions_dir")]
    pub revisions_dir: PathBuf,

    #[serde(default)]
    pub allow_multiple_heads: bool,

    #[serde(default = "default_version_table")]
    pub version_table: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_revisions_dir() -> PathBuf {
    PathBuf::from("./revisions")
}
fn default_version_table() -> String {
    DEFAULT_VERSION_TABLE.to_string()
}

/// Values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub revisions_dir: Option<PathBuf>,
}

impl Overrides {
    /// Overrides from `AEROMIGRATE_*` environment variables
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            database: var(ENV_DATABASE),
            revisions_dir: var(ENV_REVISIONS_DIR),
        }
    }

    /// Layer `other` on top of `self`
    pub fn merge(self, other: Overrides) -> Self {
        Self {
            database: other.database.or(self.database),
            revisions_dir: other.revisions_dir.or(self.revisions_dir),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::new(),
            revisions_dir: default_revisions_dir(),
            allow_multiple_heads: false,
            version_table: default_version_table(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from file, apply overrides, validate
    ///
    /// A missing file at the default location is not an error when the
    /// overrides supply the database.
    pub fn load(path: &Path, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = if path.exists() || path != Path::new(DEFAULT_CONFIG_PATH) {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without validating it
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(database) = overrides.database {
            self.database = database;
        }
        if let Some(revisions_dir) = overrides.revisions_dir {
            self.revisions_dir = revisions_dir;
        }
    }

    /// Validate every field, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut v = ConfigValidator::new();
        v.validate_non_empty("database", &self.database.to_string_lossy())
            .validate_parent_exists("database", &self.database)
            .validate_non_empty("revisions_dir", &self.revisions_dir.to_string_lossy())
            .validate_is_directory("revisions_dir", &self.revisions_dir)
            .validate_identifier("version_table", &self.version_table)
            .validate_one_of("logging.level", &self.logging.level, &LOG_LEVELS)
            .validate_one_of("logging.format", &self.logging.format, &LOG_FORMATS);
        v.finish().map_err(ConfigError::Invalid)
    }

    pub fn head_policy(&self) -> HeadPolicy {
        if self.allow_multiple_heads {
            HeadPolicy::AllowBranches
        } else {
            HeadPolicy::SingleHead
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(temp_dir: &TempDir, content: &str) -> PathBuf {
        let path = temp_dir.path().join("aeromigrate.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("app.db");
        let path = write_config(&temp_dir, &format!("database = {:?}\n", db));

        let config = Config::load(&path, Overrides::default()).unwrap();
        assert_eq!(config.database, db);
        assert_eq!(config.revisions_dir, PathBuf::from("./revisions"));
        assert_eq!(config.version_table, "aeromigrate_version");
        assert!(!config.allow_multiple_heads);
        assert_eq!(config.head_policy(), HeadPolicy::SingleHead);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("app.db");
        let path = write_config(
            &temp_dir,
            &format!(
                "database = {:?}\nrevisions_dir = {:?}\nallow_multiple_heads = true\n\
                 version_table = \"schema_rev\"\n\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n",
                db,
                temp_dir.path()
            ),
        );

        let config = Config::load(&path, Overrides::default()).unwrap();
        assert_eq!(config.version_table, "schema_rev");
        assert_eq!(config.head_policy(), HeadPolicy::AllowBranches);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_overrides_win() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "database = \"/nowhere/file.db\"\n");
        let db = temp_dir.path().join("override.db");

        let overrides = Overrides {
            database: Some(PathBuf::from("/ignored.db")),
            revisions_dir: None,
        }
        .merge(Overrides {
            database: Some(db.clone()),
            revisions_dir: Some(temp_dir.path().to_path_buf()),
        });

        let config = Config::load(&path, overrides).unwrap();
        assert_eq!(config.database, db);
        assert_eq!(config.revisions_dir, temp_dir.path());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "version_table = \"bad name\"\n[logging]\nformat = \"xml\"\n",
        );

        match Config::load(&path, Overrides::default()).unwrap_err() {
            ConfigError::Invalid(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, ["database", "version_table", "logging.format"]);
            }
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "database = [unclosed");
        assert!(matches!(
            Config::load(&path, Overrides::default()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("absent.toml"), Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
