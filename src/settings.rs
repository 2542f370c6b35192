// src/settings.rs
//
// Persistent configuration, stored as TOML under the user config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::dispatch::filter::FilterState;
use crate::error::LinkError;
use crate::io::serial::BAUD_PRESETS;
use crate::io::{BleConfig, SerialConfig, TransportConfig, TransportKind};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LinkSettings {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub filters: FilterSettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Initial category filters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilterSettings {
    #[serde(default = "default_true")]
    pub midi: bool,
    #[serde(default = "default_true")]
    pub graphics: bool,
    #[serde(default = "default_true")]
    pub other: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    /// Capture log directory; capture is off when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Diagnostic level, overridden by `BITLINK_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            midi: true,
            graphics: true,
            other: true,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_log_level(),
        }
    }
}

/// `<config_dir>/bitlink/settings.toml`
pub fn default_settings_path() -> Result<PathBuf, LinkError> {
    let dir = dirs::config_dir()
        .ok_or_else(|| LinkError::Settings("no user config directory".to_string()))?;
    Ok(dir.join("bitlink").join("settings.toml"))
}

impl LinkSettings {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, LinkError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkError::Settings(format!("failed to read {}: {}", path.display(), e))
        })?;
        let settings: LinkSettings = toml::from_str(&content).map_err(|e| {
            LinkError::Settings(format!("failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_default() -> Result<Self, LinkError> {
        Self::load(&default_settings_path()?)
    }

    pub fn save(&self, path: &Path) -> Result<(), LinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LinkError::Settings(format!("failed to serialize settings: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.serial.baud_rate == 0 {
            return Err(LinkError::Settings("invalid baud rate 0".to_string()));
        }
        if !BAUD_PRESETS.contains(&self.serial.baud_rate) {
            warn!(baud = self.serial.baud_rate, "non-standard baud rate");
        }
        Ok(())
    }

    pub fn filter_state(&self) -> FilterState {
        FilterState::new(self.filters.midi, self.filters.graphics, self.filters.other)
    }

    pub fn transport_config(&self, kind: TransportKind) -> TransportConfig {
        match kind {
            TransportKind::Serial => TransportConfig::Serial(self.serial.clone()),
            TransportKind::Ble => TransportConfig::Ble(self.ble.clone()),
        }
    }
}
