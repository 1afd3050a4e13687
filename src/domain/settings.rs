//! Demo program settings, persisted as JSON under the user's config
//! directory. The library itself is configured through
//! [`HalConfig`](crate::HalConfig) only.

use crate::domain::config::HalConfig;
use crate::domain::models::BusKind;
use crate::infrastructure::bluez::protocol::SERVICE_NAME;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "ble-hal";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_hal".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_run_seconds() -> u64 {
    5
}
fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    /// How long the demo keeps the HAL running before shutting down.
    #[serde(default = "default_run_seconds")]
    pub run_seconds: u64,

    // Bus selection
    #[serde(default = "default_false")]
    pub use_session_bus: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            run_seconds: default_run_seconds(),
            use_session_bus: default_false(),
            service_name: default_service_name(),
        }
    }
}

impl Settings {
    pub fn bus_kind(&self) -> BusKind {
        if self.use_session_bus {
            BusKind::Session
        } else {
            BusKind::System
        }
    }

    /// HAL configuration without an event callback; the caller adds one.
    pub fn hal_config(&self) -> HalConfig {
        HalConfig::new()
            .bus(self.bus_kind())
            .service_name(self.service_name.clone())
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the default location, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir().context("Could not determine config directory")?;
        path.push(CONFIG_DIR_NAME);
        path.push(SETTINGS_FILE_NAME);
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Write the current settings if no file exists yet, so users have a
    /// template to edit. Returns whether a file was written.
    pub fn save_if_missing(&self) -> anyhow::Result<bool> {
        if self.settings_path.exists() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }
}
