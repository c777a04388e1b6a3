//! Configuration loading, config file resolution and validation
//!
//! Bootstrap configuration is a single TOML file. Every key is optional and
//! falls back to a compiled default, so a missing file is never fatal. A file
//! that exists but does not parse, or values that violate the control
//! invariants, abort startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fmt;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SDW_CONFIG";

/// Longest accepted start/stop override (one year)
pub const MAX_OVERRIDE_MINUTES: i64 = 525_600;

/// UTC offsets in use span -12:00 to +14:00
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// A path was requested but did not exist; defaults used
    MissingFile(PathBuf),
    /// No file requested or found; defaults used
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "file {}", path.display()),
            ConfigSource::MissingFile(path) => {
                write!(f, "compiled defaults ({} not found)", path.display())
            }
            ConfigSource::Defaults => write!(f, "compiled defaults"),
        }
    }
}

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub simulation: SimulationConfig,
    pub weather: WeatherConfig,
    pub predictor: PredictorConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    5000 // dashboard expects the API on 5000
}

/// Control loop cadence, tank geometry and decision thresholds
///
/// All levels are in the same unit as the sensor reading.
/// Required ordering: `0 <= emergency_floor < pump_on_threshold <
/// pump_off_threshold < safety_ceiling <= container_height`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Seconds between control loop ticks
    pub update_interval_secs: u64,
    pub container_height: f64,
    /// Critical-low reading that forces the pump on
    pub emergency_floor: f64,
    /// Predictor ON is honoured only at or below this reading
    pub pump_on_threshold: f64,
    /// Predictor OFF is honoured only at or above this reading
    pub pump_off_threshold: f64,
    /// Near-full reading that forces the pump off
    pub safety_ceiling: f64,
    /// Length of the override set by start/stop commands
    pub manual_override_minutes: i64,
    /// Reading at startup and after reset
    pub initial_water_level: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 2,
            container_height: 6.0,
            emergency_floor: 1.0,
            pump_on_threshold: 3.5,
            pump_off_threshold: 4.5,
            safety_ceiling: 5.8,
            manual_override_minutes: 5,
            initial_water_level: 1.5,
        }
    }
}

/// Tank simulation step ranges (per tick)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub rise_min: f64,
    pub rise_max: f64,
    pub fall_min: f64,
    pub fall_max: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rise_min: 0.15,
            rise_max: 0.4,
            fall_min: 0.08,
            fall_max: 0.2,
            seed: None,
        }
    }
}

/// Open-Meteo weather client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// When false the synthetic signal is used without any network call
    pub enabled: bool,
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub site_name: String,
    /// Site wall clock as minutes east of UTC; drives the time-of-day feature
    pub utc_offset_minutes: i32,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            latitude: 24.1197,
            longitude: 82.6739,
            site_name: "Singrauli Coalfield, MP".to_string(),
            utc_offset_minutes: 330,
            timeout_secs: 10,
        }
    }
}

/// Pump predictor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Exported decision forest (JSON). None selects the rule-based predictor.
    pub model_path: Option<PathBuf>,
    /// Fixed diesel cost feature fed to the predictor
    pub diesel_cost: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            diesel_cost: 18.5,
        }
    }
}

/// Debug-only surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Mount `/api/test/*` injection routes
    pub test_endpoints: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            test_endpoints: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file that must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve and load configuration
    ///
    /// Missing file → compiled defaults. Unreadable or malformed file → error.
    /// Nothing is logged here; the caller reports the returned source once
    /// logging is up.
    pub fn load(cli_arg: Option<&Path>) -> Result<(Self, ConfigSource)> {
        match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
            Some(path) if path.exists() => {
                let config = Self::from_file(&path)?;
                Ok((config, ConfigSource::File(path)))
            }
            Some(path) => Ok((Self::default(), ConfigSource::MissingFile(path))),
            None => Ok((Self::default(), ConfigSource::Defaults)),
        }
    }

    /// Check every invariant the control loop relies on
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;

        if c.update_interval_secs == 0 {
            return Err(Error::Config(
                "control.update_interval_secs must be > 0".to_string(),
            ));
        }
        if !(c.container_height.is_finite() && c.container_height > 0.0) {
            return Err(Error::Config(format!(
                "control.container_height must be positive, got {}",
                c.container_height
            )));
        }
        for (name, value) in [
            ("emergency_floor", c.emergency_floor),
            ("pump_on_threshold", c.pump_on_threshold),
            ("pump_off_threshold", c.pump_off_threshold),
            ("safety_ceiling", c.safety_ceiling),
            ("initial_water_level", c.initial_water_level),
        ] {
            if !value.is_finite() || value < 0.0 || value > c.container_height {
                return Err(Error::Config(format!(
                    "control.{} = {} is outside [0, {}]",
                    name, value, c.container_height
                )));
            }
        }
        if c.emergency_floor >= c.pump_on_threshold {
            return Err(Error::Config(format!(
                "emergency_floor ({}) must be below pump_on_threshold ({})",
                c.emergency_floor, c.pump_on_threshold
            )));
        }
        if c.pump_on_threshold >= c.pump_off_threshold {
            return Err(Error::Config(format!(
                "pump_on_threshold ({}) must be below pump_off_threshold ({}); the hysteresis band would be empty",
                c.pump_on_threshold, c.pump_off_threshold
            )));
        }
        if c.pump_off_threshold >= c.safety_ceiling {
            return Err(Error::Config(format!(
                "pump_off_threshold ({}) must be below safety_ceiling ({})",
                c.pump_off_threshold, c.safety_ceiling
            )));
        }
        if c.manual_override_minutes <= 0 || c.manual_override_minutes > MAX_OVERRIDE_MINUTES {
            return Err(Error::Config(format!(
                "control.manual_override_minutes must be in 1..={}, got {}",
                MAX_OVERRIDE_MINUTES, c.manual_override_minutes
            )));
        }

        let s = &self.simulation;
        for (name, min, max) in [("rise", s.rise_min, s.rise_max), ("fall", s.fall_min, s.fall_max)] {
            if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
                return Err(Error::Config(format!(
                    "simulation.{name}_min ({min}) / {name}_max ({max}) must satisfy 0 <= min <= max"
                )));
            }
        }

        if self.weather.timeout_secs == 0 {
            return Err(Error::Config("weather.timeout_secs must be > 0".to_string()));
        }
        if !(-90.0..=90.0).contains(&self.weather.latitude)
            || !(-180.0..=180.0).contains(&self.weather.longitude)
        {
            return Err(Error::Config(format!(
                "weather coordinates out of range: ({}, {})",
                self.weather.latitude, self.weather.longitude
            )));
        }
        if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&self.weather.utc_offset_minutes) {
            return Err(Error::Config(format!(
                "weather.utc_offset_minutes = {} is outside ±{}",
                self.weather.utc_offset_minutes, MAX_UTC_OFFSET_MINUTES
            )));
        }

        if !self.predictor.diesel_cost.is_finite() {
            return Err(Error::Config("predictor.diesel_cost must be finite".to_string()));
        }

        Ok(())
    }
}

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Per-user then system-wide config file, if present
/// 4. None (compiled defaults)
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Well-known locations
    default_config_locations().into_iter().find(|p| p.exists())
}

/// Well-known config file locations, most specific first
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("sdw").join("config.toml"));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc/sdw/config.toml"));
    }
    locations
}
