//! Acquisition configuration.
//!
//! One explicit value carrying every instrument setting the capture loop pushes
//! at startup plus storage and timing parameters. Stored as JSON so a deployment
//! can keep its settings next to the data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::librevna::{Detector, Window};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for a continuous spectrum capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sweep start frequency in MHz
    pub start_mhz: f64,
    /// Sweep stop frequency in MHz
    pub stop_mhz: f64,
    /// Resolution bandwidth in kHz
    pub rbw_khz: f64,
    pub window: Window,
    pub detector: Detector,
    /// Sweeps per averaging cycle; one capture block per completed cycle
    pub average_count: u32,
    /// Signal identification (image rejection)
    pub signal_id: bool,
    /// Capture blocks per storage unit before rotating to a new one
    pub blocks_per_unit: usize,
    /// Directory receiving storage unit files
    pub output_dir: PathBuf,
    /// Wait between average-count polls
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Wait between attempts to switch the instrument into SA mode
    #[serde(with = "duration_secs")]
    pub mode_retry_interval: Duration,
    /// Consecutive timed-out exchanges tolerated before giving up
    pub max_consecutive_timeouts: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            start_mhz: 1.0,
            stop_mhz: 100.0,
            rbw_khz: 50.0,
            window: Window::Kaiser,
            detector: Detector::Average,
            average_count: 1,
            signal_id: true,
            blocks_per_unit: 3,
            output_dir: PathBuf::from("out"),
            poll_interval: Duration::from_secs(1),
            mode_retry_interval: Duration::from_secs(1),
            max_consecutive_timeouts: 5,
        }
    }
}

impl AcquisitionConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the configuration for values the capture loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.start_mhz >= 0.0 && self.start_mhz < self.stop_mhz) {
            return Err(ConfigError::Invalid(format!(
                "start frequency {} MHz must be non-negative and below stop frequency {} MHz",
                self.start_mhz, self.stop_mhz
            )));
        }
        if !(self.rbw_khz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "resolution bandwidth must be positive, got {} kHz",
                self.rbw_khz
            )));
        }
        if self.average_count == 0 {
            return Err(ConfigError::Invalid(
                "average count must be at least 1".to_string(),
            ));
        }
        if self.blocks_per_unit == 0 {
            return Err(ConfigError::Invalid(
                "blocks per unit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
