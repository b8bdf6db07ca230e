//! Configuration loading using Figment.
//!
//! Settings are read from a TOML file (by default `config/labdrivers.toml`)
//! and can be overridden with environment variables prefixed `LABDRIVERS_`.
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! LABDRIVERS_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! Durations accept human readable values (`"5s"`, `"250ms"`).
//!
//! ```no_run
//! use barrera_lab_drivers::config::Settings;
//!
//! let settings = Settings::load().unwrap();
//! for instrument in settings.enabled_instruments() {
//!     println!("{} on {}", instrument.id, instrument.port);
//! }
//! ```

use crate::error::{AppResult, DriverError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/labdrivers.toml";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-wide settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instruments known to the lab.
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name shown in logs.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Supported instrument models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentModel {
    /// Barrera DC DAC box (AD5764, 8 channels).
    Dcdac5764,
    /// Barrera AC DAC box (AD9106, 4 channels).
    Acdac9106,
    /// Keithley DMM6500 bench multimeter.
    Keithley6500,
}

impl InstrumentModel {
    /// Whether a simulated device exists for this model.
    pub fn has_simulation(&self) -> bool {
        matches!(self, InstrumentModel::Dcdac5764 | InstrumentModel::Acdac9106)
    }
}

impl fmt::Display for InstrumentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentModel::Dcdac5764 => "dcdac5764",
            InstrumentModel::Acdac9106 => "acdac9106",
            InstrumentModel::Keithley6500 => "keithley6500",
        };
        f.write_str(name)
    }
}

/// One instrument on a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Unique instrument identifier
    pub id: String,
    /// Which driver to use.
    pub model: InstrumentModel,
    /// Serial port (e.g., "/dev/ttyUSB0", "COM3"); ignored when simulated
    #[serde(default)]
    pub port: String,
    /// Baud rate of the port.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Line terminator for commands and replies
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Wait after opening the port; the driver's default when absent
    #[serde(default, with = "humantime_serde")]
    pub boot_delay: Option<Duration>,
    /// Connect this instrument when all are opened.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Talk to an in-memory simulation instead of a port
    #[serde(default)]
    pub simulated: bool,
    /// Send `*RST` right after connecting
    #[serde(default)]
    pub reset_on_connect: bool,
}

impl InstrumentConfig {
    /// Config for `model` on `port` with every optional field at its default.
    pub fn new(id: impl Into<String>, model: InstrumentModel, port: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model,
            port: port.into(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            terminator: default_terminator(),
            boot_delay: None,
            enabled: default_enabled(),
            simulated: false,
            reset_on_connect: false,
        }
    }

    fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| {
            Err(DriverError::Config(format!(
                "instrument '{}': {}",
                self.id, reason
            )))
        };

        if self.id.trim().is_empty() {
            return Err(DriverError::Config("instrument id cannot be empty".into()));
        }
        if self.timeout.is_zero() {
            return invalid("'timeout' must be greater than zero".into());
        }
        if self.simulated {
            if !self.model.has_simulation() {
                return invalid(format!("no simulation available for {}", self.model));
            }
            return Ok(());
        }
        if self.port.trim().is_empty() {
            return invalid("'port' cannot be empty".into());
        }
        if self.baud_rate == 0 {
            return invalid("'baud_rate' must be greater than zero".into());
        }
        if self.terminator.is_empty() {
            return invalid("'terminator' cannot be empty".into());
        }
        Ok(())
    }
}

fn default_app_name() -> String {
    "Barrera lab drivers".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// Environment variables take precedence over the file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABDRIVERS_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for consistency.
    ///
    /// - log level is one of trace, debug, info, warn, error
    /// - instrument ids are unique
    /// - every instrument has a port, a baud rate, a timeout and a terminator
    /// - no two enabled instruments share a port
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DriverError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for instrument in &self.instruments {
            instrument.validate()?;

            if !ids.insert(instrument.id.as_str()) {
                return Err(DriverError::Config(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            if instrument.enabled
                && !instrument.simulated
                && !ports.insert(instrument.port.as_str())
            {
                return Err(DriverError::Config(format!(
                    "Port '{}' is used by more than one enabled instrument",
                    instrument.port
                )));
            }
        }
        Ok(())
    }

    /// Instruments with `enabled = true`, in file order.
    pub fn enabled_instruments(&self) -> impl Iterator<Item = &InstrumentConfig> {
        self.instruments.iter().filter(|i| i.enabled)
    }

    /// Instrument with the given id.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.id == id)
    }
}
