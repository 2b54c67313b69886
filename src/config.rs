use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub site: SiteConfig,
    pub heat_meter: HeatMeterConfig,
    pub energy_bus: EnergyBusConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file; created on first start.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// IANA timezone the installation lives in; calendar-day boundaries for
    /// all summaries are midnight in this zone, not UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "Europe/Bucharest".into()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl SiteConfig {
    pub fn tz(&self) -> Result<Tz, anyhow::Error> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid site.timezone {:?}: {e}", self.timezone))
    }
}

/// Serial line parameters shared by both instrument buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    /// "N" | "E" | "O"
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    pub timeout_ms: u64,
}

fn default_parity() -> String {
    "N".into()
}
fn default_stop_bits() -> u8 {
    1
}
fn default_data_bits() -> u8 {
    8
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Dedicated heat-meter bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatMeterConfig {
    pub serial: SerialConfig,
    /// Modbus unit address of the heat meter.
    pub unit: u8,
    #[serde(default = "default_heat_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_heat_poll_ms() -> u64 {
    2500
}

/// Combined energy-meter + temperature/humidity bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyBusConfig {
    pub serial: SerialConfig,
    /// Modbus unit address of the electricity meter.
    pub energy_unit: u8,
    /// Modbus unit address of the temperature/humidity sensor.
    pub climate_unit: u8,
    #[serde(default = "default_bus_poll_ms")]
    pub poll_interval_ms: u64,
    /// Settle time between consecutive reads on the shared line.
    #[serde(default = "default_inter_read_pause_ms")]
    pub inter_read_pause_ms: u64,
}

fn default_bus_poll_ms() -> u64 {
    1200
}
fn default_inter_read_pause_ms() -> u64 {
    200
}

/// Thresholds for the operating-mode classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Electrical power above which the compressor is considered running (W).
    #[serde(default = "default_power_high_w")]
    pub power_high_w: f64,
    /// Electrical power above which the unit is at least coasting (W).
    #[serde(default = "default_power_low_w")]
    pub power_low_w: f64,
    /// Minimum circuit flow for the coasting hold-over (m³/h).
    #[serde(default = "default_flow_min_m3h")]
    pub flow_min_m3h: f64,
    /// Dead band on the inlet/outlet temperature difference (K).
    #[serde(default = "default_delta_t_c")]
    pub delta_t_c: f64,
    /// Ambient temperature below which a reversed cycle is a defrost (°C).
    #[serde(default = "default_ambient_max_c")]
    pub ambient_max_c: f64,
}

fn default_power_high_w() -> f64 {
    300.0
}
fn default_power_low_w() -> f64 {
    90.0
}
fn default_flow_min_m3h() -> f64 {
    0.2
}
fn default_delta_t_c() -> f64 {
    0.02
}
fn default_ambient_max_c() -> f64 {
    20.0
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            power_high_w: default_power_high_w(),
            power_low_w: default_power_low_w(),
            flow_min_m3h: default_flow_min_m3h(),
            delta_t_c: default_delta_t_c(),
            ambient_max_c: default_ambient_max_c(),
        }
    }
}

/// Cadence of the sampling/summarization loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Evaluation tick of the recorder loop (s).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Dwell before re-persisting an unchanged non-standby status (s).
    #[serde(default = "default_active_dwell_secs")]
    pub active_dwell_secs: u64,
    /// Dwell before re-persisting an unchanged standby status (s).
    #[serde(default = "default_standby_dwell_secs")]
    pub standby_dwell_secs: u64,
}

fn default_tick_secs() -> u64 {
    5
}
fn default_active_dwell_secs() -> u64 {
    10
}
fn default_standby_dwell_secs() -> u64 {
    300
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            active_dwell_secs: default_active_dwell_secs(),
            standby_dwell_secs: default_standby_dwell_secs(),
        }
    }
}

impl Config {
    /// Load YAML from disk. If `DATABASE_PATH` is set in the environment it
    /// overrides whatever the file had for `database.path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        let mut cfg: Self = serde_yaml::from_str(&raw)?;

        if let Ok(db_path) = std::env::var("DATABASE_PATH") {
            cfg.database.path = db_path;
        }

        anyhow::ensure!(!cfg.database.path.is_empty(), "database.path must be set");
        anyhow::ensure!(cfg.recorder.tick_secs > 0, "recorder.tick_secs must be > 0");
        anyhow::ensure!(
            cfg.heat_meter.poll_interval_ms > 0 && cfg.energy_bus.poll_interval_ms > 0,
            "poll intervals must be > 0"
        );
        cfg.site.tz()?;
        Ok(cfg)
    }
}
