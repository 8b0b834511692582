//! TOML-based configuration for the floorvc engine.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, see [`EngineConfig::default`]) yields a working local setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Commented configuration written by `floorvc init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# floorvc configuration

[storage]
# Directory holding the database and the version blob area.
data_dir = "./data"
database_file = "floorvc.db"
blob_dir = "versions"

[logging]
# trace, debug, info, warn or error.
level = "info"

[merge]
# "two_way" compares branch heads directly; "three_way" diffs each head
# against their common ancestor and only reports true divergences.
detection = "two_way"
# "materialize" builds a merged document from the conflict resolutions;
# "fast_forward" moves the target head to the source head.
strategy = "materialize"

[annotations]
search_limit = 200
"#;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Database and blob locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tracing filter used by binaries.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Conflict detection and merge execution behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub annotations: AnnotationConfig,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite file name, relative to `data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Blob directory name, relative to `data_dir`.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_database_file() -> String {
    "floorvc.db".into()
}
fn default_blob_dir() -> String {
    "versions".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            blob_dir: default_blob_dir(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// How conflicts between two branch heads are computed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Compare the two heads directly.
    #[default]
    TwoWay,
    /// Diff both heads against their merge base.
    ThreeWay,
}

/// What executing a merge does to the target branch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Build a merged document from the resolutions and commit it.
    #[default]
    Materialize,
    /// Move the target head to the source head.
    FastForward,
}

impl MergeStrategy {
    /// Label recorded on merge requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Materialize => "materialize",
            Self::FastForward => "fast_forward",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeConfig {
    #[serde(default)]
    pub detection: DetectionMode,

    #[serde(default)]
    pub strategy: MergeStrategy,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationConfig {
    /// Maximum number of hits returned by an annotation search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

fn default_search_limit() -> usize {
    200
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Load an [`EngineConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.data_dir".into(),
                detail: "data directory must not be empty".into(),
            });
        }
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if self.storage.blob_dir.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.blob_dir".into(),
                detail: "blob directory name must not be empty".into(),
            });
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("unknown level '{}'", self.logging.level),
            });
        }
        if self.annotations.search_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "annotations.search_limit".into(),
                detail: "search limit must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
