mod env;

use crate::building::PublishSchedule;
use crate::runtime::MAX_SCHEDULE_MS;
use crate::sensor::DEFAULT_MAX_READINGS;
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete hub configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub building: BuildingConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Durable state location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file, or ":memory:" for a volatile store
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "sensorhub.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Status publication schedule. Signed so a bad period surfaces as a
/// schedule error at activation rather than a parse error here.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildingConfig {
    #[serde(default = "default_reminder_ms")]
    pub reminder_due_ms: i64,
    #[serde(default = "default_reminder_ms")]
    pub reminder_period_ms: i64,
}

fn default_reminder_ms() -> i64 {
    5000
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self {
            reminder_due_ms: default_reminder_ms(),
            reminder_period_ms: default_reminder_ms(),
        }
    }
}

impl BuildingConfig {
    pub fn schedule(&self) -> PublishSchedule {
        PublishSchedule {
            due_time_ms: self.reminder_due_ms,
            period_ms: self.reminder_period_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_max_readings")]
    pub max_readings: usize,
}

fn default_max_readings() -> usize {
    DEFAULT_MAX_READINGS
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            max_readings: default_max_readings(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Events buffered per WebSocket subscriber before it starts missing them
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_subscriber_buffer() -> usize {
    16
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl HubConfig {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sensor.max_readings > 0,
            "sensor.max_readings must be at least 1"
        );
        ensure!(
            self.api.subscriber_buffer > 0,
            "api.subscriber_buffer must be at least 1"
        );
        // Non-positive values are left to surface as InvalidSchedule on activation
        ensure!(
            self.building.reminder_due_ms <= MAX_SCHEDULE_MS,
            "building.reminder_due_ms must not exceed {}",
            MAX_SCHEDULE_MS
        );
        ensure!(
            self.building.reminder_period_ms <= MAX_SCHEDULE_MS,
            "building.reminder_period_ms must not exceed {}",
            MAX_SCHEDULE_MS
        );
        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HubConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: HubConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// File config if present, then environment overrides, then validation.
pub fn load_from_env() -> Result<HubConfig> {
    let path = std::env::var(env::CONFIG_PATH_VAR).unwrap_or_else(|_| "sensorhub.toml".to_string());

    let mut config = if Path::new(&path).exists() {
        load_config(&path)?
    } else {
        HubConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
