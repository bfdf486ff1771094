//! Configuration management.
//!
//! Deskline keeps everything for a device under `~/.deskline/`:
//! - **Database**: `~/.deskline/data/deskline.db` (override with `--db` or `DESKLINE_DB`)
//! - **Settings**: `~/.deskline/config.json`
//! - **Outbox**: `~/.deskline/data/outbox.jsonl`, next to the database
//!
//! Remote settings can also come from `DESKLINE_REMOTE_*` environment
//! variables, which win over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_DB: &str = "DESKLINE_DB";
pub const ENV_REMOTE_ENDPOINT: &str = "DESKLINE_REMOTE_ENDPOINT";
pub const ENV_REMOTE_PROJECT: &str = "DESKLINE_REMOTE_PROJECT";
pub const ENV_REMOTE_API_KEY: &str = "DESKLINE_REMOTE_API_KEY";

/// Get the global Deskline directory, `~/.deskline/`.
#[must_use]
pub fn global_deskline_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".deskline"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag, which clap also fills from `DESKLINE_DB`)
/// 2. `DESKLINE_DB` environment variable
/// 3. `~/.deskline/data/deskline.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var(ENV_DB) {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_deskline_dir().map(|dir| dir.join("data").join("deskline.db"))
}

/// Directory holding device-local sync state for a database.
#[must_use]
pub fn data_dir_for(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesklineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
}

/// Remote document store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Mirror the outbox to disk so queued writes survive restarts.
    #[serde(default = "default_true")]
    pub offline_persistence: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval() -> u64 {
    5
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            project_id: None,
            api_key: None,
            offline_persistence: true,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl SyncSettings {
    /// Enabled with both an endpoint and a project.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.enabled
            && self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
            && self.project_id.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    /// Apply `DESKLINE_REMOTE_*` overrides read through `lookup`.
    ///
    /// Setting an endpoint through the environment also enables sync.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty(ENV_REMOTE_ENDPOINT) {
            self.endpoint = Some(endpoint);
            self.enabled = true;
        }
        if let Some(project) = non_empty(ENV_REMOTE_PROJECT) {
            self.project_id = Some(project);
        }
        if let Some(key) = non_empty(ENV_REMOTE_API_KEY) {
            self.api_key = Some(key);
        }
        self
    }
}

/// Path of `config.json`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    global_deskline_dir().map(|dir| dir.join("config.json"))
}

/// Load a config file. A missing file is the default config.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists but is not valid.
pub fn load_config_from(path: &Path) -> Result<DesklineConfig> {
    if !path.exists() {
        return Ok(DesklineConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Load `~/.deskline/config.json`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists but is not valid.
pub fn load_config() -> Result<DesklineConfig> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Ok(DesklineConfig::default()),
    }
}

/// Effective sync settings: config file plus environment overrides.
#[must_use]
pub fn resolve_sync_settings(config: &DesklineConfig) -> SyncSettings {
    config
        .sync
        .clone()
        .unwrap_or_default()
        .with_overrides(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        assert_eq!(resolve_db_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_global_dir_is_dot_deskline() {
        let dir = global_deskline_dir().unwrap();
        assert!(dir.ends_with(".deskline"));
    }

    #[test]
    fn test_data_dir_is_db_parent() {
        assert_eq!(
            data_dir_for(Path::new("/tmp/x/deskline.db")),
            PathBuf::from("/tmp/x")
        );
    }

    #[test]
    fn test_sync_settings_defaults() {
        let settings: SyncSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.enabled);
        assert!(settings.offline_persistence);
        assert_eq!(settings.poll_interval_secs, 5);
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_load_config_camel_case() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"sync": {"enabled": true, "endpoint": "https://docs.example", "projectId": "desk", "offlinePersistence": false}}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let sync = config.sync.unwrap();
        assert!(sync.is_configured());
        assert_eq!(sync.project_id.as_deref(), Some("desk"));
        assert!(!sync.offline_persistence);
    }

    #[test]
    fn test_missing_config_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config_from(&temp_dir.path().join("nope.json")).unwrap();
        assert_eq!(config, DesklineConfig::default());
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_REMOTE_ENDPOINT, "memory://"),
            (ENV_REMOTE_PROJECT, "desk"),
            (ENV_REMOTE_API_KEY, ""),
        ]);
        let base = SyncSettings {
            api_key: Some("from-file".into()),
            ..SyncSettings::default()
        };

        let settings = base.with_overrides(|name| env.get(name).map(ToString::to_string));
        assert!(settings.is_configured());
        assert_eq!(settings.endpoint.as_deref(), Some("memory://"));
        assert_eq!(settings.api_key.as_deref(), Some("from-file"));
    }
}
