//! Drivers for the supported instruments.
//!
//! Each driver wraps an [`Instrument`] declared with the device's parameters
//! and adds the device-specific operations (reset, trigger, ...).
//! [`Driver::open`] builds the right one from an [`InstrumentConfig`].

pub mod acdac9106;
pub mod dcdac5764;
pub mod keithley6500;

pub use acdac9106::{AcDac9106, DisplayMode};
pub use dcdac5764::DcDac5764;
pub use keithley6500::{AveragingType, Keithley6500};

use crate::config::{InstrumentConfig, InstrumentModel};
use crate::error::{AppResult, DriverError};
use crate::instrument::{Instrument, InstrumentBuilder};
use crate::snapshot::Snapshot;
use crate::transport::{sim, Transport};
use std::time::Duration;

/// How to bring up a driver.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Instrument name used in logs and snapshots.
    pub name: String,
    /// Overrides the driver's default boot delay.
    pub boot_delay: Option<Duration>,
    /// Reply timeout applied right after the handshake.
    pub timeout: Option<Duration>,
    /// Reset the device after connecting.
    pub reset: bool,
}

impl ConnectOptions {
    /// Options with the driver defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            boot_delay: None,
            timeout: None,
            reset: false,
        }
    }

    /// Override the boot delay.
    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = Some(delay);
        self
    }

    /// Reply timeout to apply after connecting.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reset the device after connecting.
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Options matching an instrument's configuration entry.
    pub fn from_config(config: &InstrumentConfig) -> Self {
        Self {
            name: config.id.clone(),
            boot_delay: config.boot_delay,
            timeout: Some(config.timeout),
            reset: config.reset_on_connect,
        }
    }

    pub(crate) fn apply(&self, builder: InstrumentBuilder) -> InstrumentBuilder {
        match self.boot_delay {
            Some(delay) => builder.boot_delay(delay),
            None => builder,
        }
    }

    pub(crate) fn configure(&self, instrument: &mut Instrument) -> AppResult<()> {
        if let Some(timeout) = self.timeout {
            instrument.set_timeout(timeout)?;
        }
        Ok(())
    }
}

/// Any connected driver.
#[derive(Debug)]
pub enum Driver {
    /// DC DAC box.
    DcDac5764(DcDac5764),
    /// AC DAC box.
    AcDac9106(AcDac9106),
    /// Keithley DMM6500 multimeter.
    Keithley6500(Keithley6500),
}

impl Driver {
    /// Connect `model` over an already opened transport.
    pub fn connect<T: Transport + 'static>(
        model: InstrumentModel,
        transport: T,
        options: &ConnectOptions,
    ) -> AppResult<Self> {
        Ok(match model {
            InstrumentModel::Dcdac5764 => {
                Driver::DcDac5764(DcDac5764::connect(transport, options)?)
            }
            InstrumentModel::Acdac9106 => {
                Driver::AcDac9106(AcDac9106::connect(transport, options)?)
            }
            InstrumentModel::Keithley6500 => {
                Driver::Keithley6500(Keithley6500::connect(transport, options)?)
            }
        })
    }

    /// Connect the instrument described by `config`, opening its serial port
    /// or its simulation.
    pub fn open(config: &InstrumentConfig) -> AppResult<Self> {
        let mut options = ConnectOptions::from_config(config);

        if config.simulated {
            options.boot_delay = Some(Duration::ZERO);
            return match config.model {
                InstrumentModel::Dcdac5764 => {
                    Self::connect(config.model, sim::dcdac5764(), &options)
                }
                InstrumentModel::Acdac9106 => {
                    Self::connect(config.model, sim::acdac9106(), &options)
                }
                InstrumentModel::Keithley6500 => Err(DriverError::Config(format!(
                    "no simulation available for {}",
                    config.model
                ))),
            };
        }

        Self::open_serial(config, &options)
    }

    #[cfg(feature = "instrument_serial")]
    fn open_serial(config: &InstrumentConfig, options: &ConnectOptions) -> AppResult<Self> {
        use crate::transport::{SerialConfig, SerialTransport};

        let serial = SerialConfig::new(&config.port, config.baud_rate)
            .with_timeout(config.timeout)
            .with_terminator(&config.terminator);
        Self::connect(config.model, SerialTransport::open(serial)?, options)
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn open_serial(config: &InstrumentConfig, _options: &ConnectOptions) -> AppResult<Self> {
        Err(DriverError::Config(format!(
            "instrument '{}' needs the instrument_serial feature",
            config.id
        )))
    }

    /// Model of the connected driver.
    pub fn model(&self) -> InstrumentModel {
        match self {
            Driver::DcDac5764(_) => InstrumentModel::Dcdac5764,
            Driver::AcDac9106(_) => InstrumentModel::Acdac9106,
            Driver::Keithley6500(_) => InstrumentModel::Keithley6500,
        }
    }

    /// The underlying instrument.
    pub fn instrument(&self) -> &Instrument {
        match self {
            Driver::DcDac5764(d) => d.instrument(),
            Driver::AcDac9106(d) => d.instrument(),
            Driver::Keithley6500(d) => d.instrument(),
        }
    }

    /// Mutable access to the underlying instrument.
    pub fn instrument_mut(&mut self) -> &mut Instrument {
        match self {
            Driver::DcDac5764(d) => d.instrument_mut(),
            Driver::AcDac9106(d) => d.instrument_mut(),
            Driver::Keithley6500(d) => d.instrument_mut(),
        }
    }

    /// Snapshot of the connected instrument.
    pub fn snapshot(&mut self, update: bool) -> Snapshot {
        self.instrument_mut().snapshot(update)
    }

    /// Close the connection.
    pub fn close(&mut self) -> AppResult<()> {
        self.instrument_mut().close()
    }
}
