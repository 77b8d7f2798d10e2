use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::attitude::{DEFAULT_ACCEL_COUNTS_PER_G, DEFAULT_GYRO_COUNTS_PER_DPS};
use crate::mission::{DEFAULT_ALTITUDE_M, DEFAULT_RADIUS_M};
use crate::serial::framer::DEFAULT_MAX_BUFFER;

pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Link and session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub write_flush_timeout_ms: u64,
    pub max_line_buffer: usize,
    pub accel_counts_per_g: f64,
    pub gyro_counts_per_dps: f64,
    pub default_altitude_m: f64,
    pub default_radius_m: f64,
    pub event_capacity: usize,
    pub command_capacity: usize,
    /// Restore the previous mission when the link drops mid-download.
    pub rollback_partial_mission: bool,
    pub log_level: String, // "error", "warn", "info", "debug", "trace"
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 25,
            write_flush_timeout_ms: 100,
            max_line_buffer: DEFAULT_MAX_BUFFER,
            accel_counts_per_g: DEFAULT_ACCEL_COUNTS_PER_G,
            gyro_counts_per_dps: DEFAULT_GYRO_COUNTS_PER_DPS,
            default_altitude_m: DEFAULT_ALTITUDE_M,
            default_radius_m: DEFAULT_RADIUS_M,
            event_capacity: 256,
            command_capacity: 64,
            rollback_partial_mission: false,
            log_level: "info".to_string(),
        }
    }
}

impl LinkSettings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: LinkSettings = serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.baud_rate > 0, "baud_rate must be positive");
        anyhow::ensure!(self.max_line_buffer > 0, "max_line_buffer must be positive");
        anyhow::ensure!(
            self.accel_counts_per_g.is_finite() && self.accel_counts_per_g > 0.0,
            "accel_counts_per_g must be positive"
        );
        anyhow::ensure!(
            self.gyro_counts_per_dps.is_finite() && self.gyro_counts_per_dps > 0.0,
            "gyro_counts_per_dps must be positive"
        );
        anyhow::ensure!(self.event_capacity > 0 && self.command_capacity > 0, "channel capacities must be positive");
        Ok(())
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.write_flush_timeout_ms)
    }
}
