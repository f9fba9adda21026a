use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::shared::error::{AppError, AppResult};

pub const DEFAULT_MAX_ITEMS: usize = 100;

fn project_dirs() -> AppResult<ProjectDirs> {
    ProjectDirs::from("com", "antigravity", "clipboard-history")
        .ok_or_else(|| AppError::Validation("Failed to determine project directories".to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Which backing medium holds the history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One JSON document rewritten on every save
    #[default]
    Json,
    /// Embedded redb table
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    /// Custom storage location; the project data dir is used when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Json,
            data_dir: None,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

impl StorageConfig {
    /// Config pointing at an explicit directory
    pub fn at(kind: StorageKind, data_dir: impl Into<PathBuf>, max_items: usize) -> Self {
        Self {
            kind,
            data_dir: Some(data_dir.into()),
            max_items,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_items == 0 {
            return Err(AppError::Validation("max_items must be at least 1".to_string()));
        }
        if let Some(dir) = &self.data_dir {
            if !dir.is_absolute() {
                return Err(AppError::Validation(format!(
                    "data_dir must be absolute: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolved storage directory
    pub fn resolve_data_dir(&self) -> AppResult<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("history")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Buffered snapshots before the monitor starts dropping updates
    pub channel_capacity: usize,
    /// How long `stop` waits for an in-flight cycle
    pub stop_grace_ms: u64,
    /// Pause between writing an image to the clipboard and reading it back
    pub publish_settle_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            channel_capacity: 10,
            stop_grace_ms: 500,
            publish_settle_ms: 200,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn publish_settle(&self) -> Duration {
        Duration::from_millis(self.publish_settle_ms)
    }
}

impl AppSettings {
    pub fn get_settings_path() -> AppResult<PathBuf> {
        Ok(project_dirs()?.config_dir().join("settings.json"))
    }

    /// Load settings from the config dir, writing defaults on first run.
    pub async fn load() -> AppResult<Self> {
        let path = Self::get_settings_path()?;

        if !path.exists() {
            let settings = Self::default();
            settings.save().await?;
            info!("Wrote default settings to {}", path.display());
            return Ok(settings);
        }

        let content = fs::read_to_string(&path).await?;
        Self::from_json(&content)
    }

    pub async fn save(&self) -> AppResult<()> {
        let path = Self::get_settings_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).await?;
        Ok(())
    }

    fn from_json(content: &str) -> AppResult<Self> {
        let mut settings: Self = serde_json::from_str(content)
            .map_err(|e| AppError::Validation(format!("Failed to parse settings: {}", e)))?;
        // hand-edited files sometimes carry 0 here
        if settings.storage.max_items == 0 {
            settings.storage.max_items = DEFAULT_MAX_ITEMS;
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.storage.kind, StorageKind::Json);
        assert_eq!(settings.storage.max_items, 100);
        assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.monitor.channel_capacity, 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings =
            AppSettings::from_json(r#"{ "storage": { "kind": "redb", "max_items": 0 } }"#).unwrap();
        assert_eq!(settings.storage.kind, StorageKind::Redb);
        assert_eq!(settings.storage.max_items, DEFAULT_MAX_ITEMS);
        assert_eq!(settings.monitor.poll_interval_ms, 500);
    }

    #[test]
    fn test_validate() {
        assert!(StorageConfig::default().validate().is_ok());

        let zero = StorageConfig { max_items: 0, ..StorageConfig::default() };
        assert!(matches!(zero.validate(), Err(AppError::Validation(_))));

        let relative = StorageConfig::at(StorageKind::Json, "relative/dir", 10);
        assert!(matches!(relative.validate(), Err(AppError::Validation(_))));
    }
}
