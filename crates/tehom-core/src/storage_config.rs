//! Configuration file for tehom
//!
//! Provides TOML-based configuration for selecting the storage backend
//! (state file vs PostgreSQL) together with certification and sampling
//! parameters.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{CertificationConfig, SamplingConfig};
pub use tehom_state::StateFormat;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TehomConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub certification: CertificationConfig,
    /// Required only by the sampling tools
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub postgresql: PostgresqlConfig,
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Filesystem,
    Postgresql,
}

/// Filesystem backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub format: StateFormat,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            format: StateFormat::default(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./storage/state.json")
}

/// PostgreSQL backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresqlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for PostgresqlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "tehom".to_string()
}
fn default_user() -> String {
    "tehom_user".to_string()
}
fn default_password() -> String {
    "tehom_pass".to_string()
}
fn default_max_connections() -> u32 {
    10
}

impl TehomConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: TehomConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.certification.validate()?;
        if let Some(sampling) = &self.sampling {
            sampling.validate()?;
        }
        Ok(())
    }

    /// Sampling section, which the sampling tools cannot run without
    pub fn require_sampling(&self) -> anyhow::Result<&SamplingConfig> {
        self.sampling.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "[sampling] section is missing; near_threshold_s and very_near_threshold_s must be configured"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_filesystem_config() {
        let config: TehomConfig = toml::from_str(
            r#"
            [storage]
            backend = "filesystem"
        "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackendKind::Filesystem);
        assert_eq!(
            config.storage.filesystem.state_path,
            PathBuf::from("./storage/state.json")
        );
        assert_eq!(config.storage.postgresql.port, 5432);
        assert_eq!(config.certification.extension, "mp3");
        assert!(config.sampling.is_none());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [storage]
            backend = "filesystem"

            [storage.filesystem]
            state_path = "./test_storage/state.bson"
            format = "bson"

            [certification]
            extension = "wav"
            max_retries = 5

            [sampling]
            spacing_s = 60
            near_threshold_s = 300
            very_near_threshold_s = 60
        "#;

        let config: TehomConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.filesystem.format, StateFormat::Bson);
        assert_eq!(config.certification.extension, "wav");
        assert_eq!(config.certification.max_retries, 5);
        assert_eq!(config.certification.file_duration_s, 300.0);

        let sampling = config.require_sampling().unwrap();
        assert_eq!(sampling.spacing_s, 60.0);
        assert_eq!(sampling.duration_s, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sampling_thresholds_are_required() {
        let toml_str = r#"
            [storage]
            backend = "postgresql"

            [sampling]
            spacing_s = 60
        "#;
        assert!(toml::from_str::<TehomConfig>(toml_str).is_err());
    }

    #[test]
    fn test_missing_sampling_section() {
        let config: TehomConfig = toml::from_str(
            r#"
            [storage]
            backend = "postgresql"

            [storage.postgresql]
            host = "db.internal"
        "#,
        )
        .unwrap();
        assert_eq!(config.storage.postgresql.host, "db.internal");
        assert_eq!(config.storage.postgresql.database, "tehom");
        assert!(config.require_sampling().is_err());
    }
}
