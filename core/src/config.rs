//! Watcher configuration.
//!
//! Stores configuration in JSON format at `~/.devwatch/config.json`.
//! Every field has a default, so a missing file or a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Delay between two exposure polls of the same service.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Annotation an exposure controller writes the public URL to.
pub const DEFAULT_EXPOSE_ANNOTATION: &str = "fabric8.io/exposeUrl";

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Polls allowed for the first service to be exposed (one per second).
    #[serde(default = "default_service_wait")]
    pub service_url_wait_time_seconds: u32,

    /// Label that marks a service for exposure.
    #[serde(default = "default_expose_label_key")]
    pub expose_label_key: String,

    /// Value of `expose_label_key` that marks a service for exposure.
    #[serde(default = "default_expose_label_value")]
    pub expose_label_value: String,

    /// Annotation holding the exposed URL.
    #[serde(default = "default_expose_annotation_key")]
    pub expose_annotation_key: String,

    /// Polls allowed for every service after the first.
    #[serde(default = "default_subsequent_wait")]
    pub subsequent_service_wait_attempts: u32,

    /// Namespace to query; kubectl's current context when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Explicit kubectl binary; discovered when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl_path: Option<PathBuf>,

    /// Prefix tagging the companion process's log lines.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

fn default_service_wait() -> u32 {
    5
}

fn default_expose_label_key() -> String {
    "expose".to_string()
}

fn default_expose_label_value() -> String {
    "true".to_string()
}

fn default_expose_annotation_key() -> String {
    DEFAULT_EXPOSE_ANNOTATION.to_string()
}

fn default_subsequent_wait() -> u32 {
    1
}

fn default_output_prefix() -> String {
    "Spring-Remote".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            service_url_wait_time_seconds: default_service_wait(),
            expose_label_key: default_expose_label_key(),
            expose_label_value: default_expose_label_value(),
            expose_annotation_key: default_expose_annotation_key(),
            subsequent_service_wait_attempts: default_subsequent_wait(),
            namespace: None,
            kubectl_path: None,
            output_prefix: default_output_prefix(),
        }
    }
}

impl WatchConfig {
    /// The subset of settings endpoint resolution depends on.
    pub fn resolution(&self) -> EndpointResolutionConfig {
        EndpointResolutionConfig {
            service_wait_seconds: self.service_url_wait_time_seconds,
            expose_label_key: self.expose_label_key.clone(),
            expose_label_value: self.expose_label_value.clone(),
            expose_annotation_key: self.expose_annotation_key.clone(),
            subsequent_service_wait_attempts: self.subsequent_service_wait_attempts,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Immutable resolution settings for one watch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolutionConfig {
    pub service_wait_seconds: u32,
    pub expose_label_key: String,
    pub expose_label_value: String,
    pub expose_annotation_key: String,
    pub subsequent_service_wait_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for EndpointResolutionConfig {
    fn default() -> Self {
        WatchConfig::default().resolution()
    }
}

/// Configuration store for the watcher settings.
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.devwatch/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        Ok(Self {
            config_path: home.join(".devwatch").join("config.json"),
        })
    }

    /// Create a config store with a custom path.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<WatchConfig> {
        if !self.config_path.exists() {
            return Ok(WatchConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub async fn save(&self, config: &WatchConfig) -> Result<()> {
        if let Some(config_dir) = self.config_path.parent() {
            fs::create_dir_all(config_dir)
                .await
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }

    /// Persist a new exposure wait budget.
    pub async fn set_service_wait(&self, seconds: u32) -> Result<()> {
        let mut config = self.load().await?;
        config.service_url_wait_time_seconds = seconds;
        self.save(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (ConfigStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        (ConfigStore::with_path(path), dir)
    }

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.service_url_wait_time_seconds, 5);
        assert_eq!(config.expose_label_key, "expose");
        assert_eq!(config.expose_label_value, "true");
        assert_eq!(config.expose_annotation_key, "fabric8.io/exposeUrl");

        let resolution = config.resolution();
        assert_eq!(resolution.subsequent_service_wait_attempts, 1);
        assert_eq!(resolution.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WatchConfig =
            serde_json::from_str(r#"{"serviceUrlWaitTimeSeconds": 12}"#).unwrap();
        assert_eq!(config.service_url_wait_time_seconds, 12);
        assert_eq!(config.output_prefix, "Spring-Remote");
        assert!(config.namespace.is_none());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _dir) = test_store();
        let config = store.load().await.unwrap();
        assert_eq!(config, WatchConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _dir) = test_store();

        let config = WatchConfig {
            namespace: Some("dev".to_string()),
            expose_annotation_key: "example.com/url".to_string(),
            ..Default::default()
        };
        store.save(&config).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_set_service_wait() {
        let (store, _dir) = test_store();
        store.set_service_wait(30).await.unwrap();
        assert_eq!(store.load().await.unwrap().service_url_wait_time_seconds, 30);
    }

    #[tokio::test]
    async fn test_invalid_file_is_config_error() {
        let (store, _dir) = test_store();
        std::fs::write(store.config_path(), "{not json").unwrap();
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
