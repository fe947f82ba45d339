//! # Configuration Management Module
//!
//! Persistent settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `recording`: where and whether the raw stream is written to `.ecg` files
//! - `pipeline`: link capacity, detector rate, ADC calibration, display filters
//! - `simulator`: signal produced by the simulated transport
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ecg-stream/config.toml
//! - Linux: ~/.config/ecg-stream/config.toml
//! - Windows: %APPDATA%\ecg-stream\config.toml
//!
//! Every section is optional in the file; missing keys take their defaults.

use crate::codec::Calibration;
use crate::error::ConfigError;
use crate::filters::{default_display_stages, FilterStage};
use crate::qrs::REFERENCE_RATE;
use crate::simulator::Waveform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub pipeline: PipelineConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Patch the sample count into the header when a recording ends
    pub update_header_on_close: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("EcgBleApp"),
            update_header_on_close: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each link between stages; 0 means unbounded
    pub link_capacity: usize,
    /// Target rate of the QRS detector input
    pub qrs_rate_hz: u32,
    pub calibration: Calibration,
    pub display_filters: Vec<FilterStage>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            link_capacity: 1024,
            qrs_rate_hz: REFERENCE_RATE,
            calibration: Calibration::default(),
            display_filters: default_display_stages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub polling_rate: u16,
    pub waveform: Waveform,
    /// Deliver frames at the pace a real device would
    pub realtime: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            polling_rate: 500,
            waveform: Waveform::Heartbeat { bpm: 72 },
            realtime: true,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ecg-stream")
            .join("config.toml")
    }

    /// Load config from the default location, or create it with defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load config from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::ParseFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                log::info!("Created default config at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
