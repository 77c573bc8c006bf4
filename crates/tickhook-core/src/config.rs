//! Tickhook configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TickhookError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TickhookConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl TickhookConfig {
    /// Load config from `$TICKHOOK_CONFIG` or the default path (~/.tickhook/config.toml).
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TICKHOOK_CONFIG")
            .map(|p| PathBuf::from(shellexpand::tilde(&p).to_string()))
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TickhookError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| TickhookError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TickhookError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tickhook home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tickhook")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("TICKHOOK_INTERNAL_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                self.gateway.internal_key = Some(key.to_string());
            }
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Path prefix under which the scheduler endpoints are mounted.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Shared secret expected in `X-Internal-Key`. None disables the check.
    #[serde(default)]
    pub internal_key: Option<String>,
}

fn default_port() -> u16 { 8080 }
fn default_host() -> String { "0.0.0.0".into() }
fn default_prefix() -> String { "/scheduler/internal".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            prefix: default_prefix(),
            internal_key: None,
        }
    }
}

/// Which task store implementation to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Json,
    Memory,
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// File path for the sqlite database or the JSON task file. `~` is expanded.
    /// Unset means `~/.tickhook/tasks.db` (sqlite) or `~/.tickhook/tasks.json` (json).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_backend() -> StoreBackend { StoreBackend::Sqlite }

impl StoreConfig {
    pub fn expanded_path(&self) -> PathBuf {
        let path = match (&self.path, self.backend) {
            (Some(path), _) => path.as_str(),
            (None, StoreBackend::Json) => "~/.tickhook/tasks.json",
            (None, _) => "~/.tickhook/tasks.db",
        };
        PathBuf::from(shellexpand::tilde(path).to_string())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

/// Minute driver pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Total wall-clock budget of one invocation.
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
    /// Minimum spacing between sweep cycles.
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
}

fn default_budget_secs() -> u64 { 50 }
fn default_cadence_secs() -> u64 { 10 }

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_budget_secs(),
            cadence_secs: default_cadence_secs(),
        }
    }
}

/// Outbound dispatch (HTTP client) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Skip server certificate validation. Off unless the targets are on a
    /// trusted internal network with self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Lowest TLS version accepted: "1.0", "1.1", "1.2" or "1.3".
    #[serde(default = "default_min_tls")]
    pub min_tls_version: String,
    /// Per-request timeout. Unset leaves the transport default in place.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_min_tls() -> String { "1.2".into() }
fn default_user_agent() -> String { format!("tickhook/{}", env!("CARGO_PKG_VERSION")) }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            min_tls_version: default_min_tls(),
            timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TickhookConfig::default();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.prefix, "/scheduler/internal");
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.driver.budget_secs, 50);
        assert_eq!(config.driver.cadence_secs, 10);
        assert!(!config.dispatch.accept_invalid_certs);
        assert_eq!(config.dispatch.min_tls_version, "1.2");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = TickhookConfig::from_toml(
            r#"
            [store]
            backend = "json"
            path = "/tmp/tasks.json"

            [driver]
            cadence_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Json);
        assert_eq!(config.store.expanded_path(), PathBuf::from("/tmp/tasks.json"));
        assert_eq!(config.driver.cadence_secs, 5);
        assert_eq!(config.driver.budget_secs, 50);
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn test_default_store_path_follows_backend() {
        let sqlite = StoreConfig::default();
        assert!(sqlite.expanded_path().ends_with(".tickhook/tasks.db"));

        let json = TickhookConfig::from_toml("[store]\nbackend = \"json\"").unwrap();
        assert!(json.store.expanded_path().ends_with(".tickhook/tasks.json"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TickhookConfig::from_toml("[driver]\nbudget_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, TickhookError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = TickhookConfig::default();
        config.gateway.port = 9191;
        config.dispatch.timeout_secs = Some(15);
        config.save_to(&path).unwrap();

        let loaded = TickhookConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9191);
        assert_eq!(loaded.dispatch.timeout_secs, Some(15));
    }
}
