//! Configuration module for the panel.
//!
//! # Module Structure
//!
//! - `loader`: Imports/exports a launch `Configuration` as a JSON file
//! - `validator`: Advisory, non-blocking field validation
//!
//! # Settings Management
//!
//! The `SettingsManager` persists `AppSettings` to `config/settings.json`:
//! - Falls back to ~/.config/vllm-panel/settings.json when no local file exists
//! - Missing file or parse failure falls back to defaults (never fatal)
//! - `VLLM_PANEL_SERVER_URL` / `VLLM_PANEL_EVENTS_URL` override the endpoints

pub mod loader;
pub mod validator;

use crate::error::ConfigError;
use crate::models::{Configuration, EnvironmentTag};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_PATH: &str = "config/settings.json";
pub const SERVER_URL_ENV: &str = "VLLM_PANEL_SERVER_URL";
pub const EVENTS_URL_ENV: &str = "VLLM_PANEL_EVENTS_URL";

/// Reconnect policy for the realtime event channel.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): doubling, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Persisted application settings
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Base URL of the process host's HTTP API
    pub server_url: String,
    /// WebSocket URL of the realtime event channel
    pub events_url: String,
    pub poll_interval_ms: u64,
    /// How long the "stopped" display lingers before settling to idle
    pub stop_display_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
    pub log_dir: String,
    /// Environment tag used until the host reports one
    pub environment: EnvironmentTag,
    /// Working configuration restored on next start
    pub last_configuration: Configuration,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            server_url: "http://127.0.0.1:5000".to_string(),
            events_url: "ws://127.0.0.1:5000/ws".to_string(),
            poll_interval_ms: 2000,
            stop_display_delay_ms: 1500,
            request_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
            log_dir: "logs".to_string(),
            environment: EnvironmentTag::Wsl,
            last_configuration: Configuration::default(),
        }
    }
}

impl AppSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_display_delay(&self) -> Duration {
        Duration::from_millis(self.stop_display_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Apply endpoint overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server_url = url.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var(EVENTS_URL_ENV) {
            if !url.trim().is_empty() {
                self.events_url = url.trim().to_string();
            }
        }
        self
    }
}

/// Settings read from disk, with anything worth logging held back until a
/// logger is installed.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSettings {
    pub settings: AppSettings,
    /// File the settings came from (may not exist)
    pub path: PathBuf,
    /// Set when the file was unreadable as settings and defaults were used
    pub warning: Option<String>,
}

impl LoadedSettings {
    /// Emit what was deferred during `read`.
    pub fn report(&self) {
        log::info!("[Config] Settings file: {}", self.path.display());
        if let Some(warning) = &self.warning {
            log::warn!("[Config] {}", warning);
        }
    }
}

/// Settings persistence for `AppSettings`
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from config/settings.json, then the global location, then defaults
    pub fn load() -> Result<AppSettings, ConfigError> {
        let loaded = Self::read()?;
        loaded.report();
        Ok(loaded.settings)
    }

    /// Like `load`, but silent: nothing is logged, so it can run before the
    /// logger exists. Call `LoadedSettings::report` afterwards.
    pub fn read() -> Result<LoadedSettings, ConfigError> {
        Self::read_from(&Self::locate())
    }

    /// The local file if present, else the global one if present, else the local path.
    pub fn locate() -> PathBuf {
        let local = PathBuf::from(SETTINGS_PATH);
        if !local.exists() {
            if let Ok(global) = Self::global_settings_path() {
                if global.exists() {
                    return global;
                }
            }
        }
        local
    }

    /// Load settings from an explicit path.
    ///
    /// A parse failure logs a warning and returns defaults instead of failing startup.
    pub fn load_from(path: &Path) -> Result<AppSettings, ConfigError> {
        let loaded = Self::read_from(path)?;
        if let Some(warning) = &loaded.warning {
            log::warn!("[Config] {}", warning);
        }
        Ok(loaded.settings)
    }

    pub fn read_from(path: &Path) -> Result<LoadedSettings, ConfigError> {
        let (settings, warning) = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppSettings>(&content) {
                Ok(settings) => (settings, None),
                Err(e) => (
                    AppSettings::default(),
                    Some(format!("Failed to parse {}, falling back to defaults: {}", path.display(), e)),
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (AppSettings::default(), None),
            Err(e) => return Err(ConfigError::IoError(e)),
        };
        Ok(LoadedSettings {
            settings,
            path: path.to_path_buf(),
            warning,
        })
    }

    /// Save settings to config/settings.json
    pub fn save(settings: &AppSettings) -> Result<(), ConfigError> {
        Self::save_to(settings, Path::new(SETTINGS_PATH))
    }

    pub fn save_to(settings: &AppSettings, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Global fallback location: ~/.config/vllm-panel/settings.json
    pub fn global_settings_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or_else(|| {
            ConfigError::ValidationFailed("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".config/vllm-panel").join("settings.json"))
    }
}
