//! Barrera DC DAC box built around the AD5764.
//!
//! Eight bipolar outputs, `channel1` .. `channel8`, each with a ±10 V output
//! voltage and two set-only calibration registers:
//!
//! | parameter | unit | range       | command                      |
//! |-----------|------|-------------|------------------------------|
//! | voltage   | V    | -10 .. 10   | `channelN:VOLTAGE[?] {value}`|
//! | offset    |      | -128 .. 127 | `channelN:OFFSET {value}`    |
//! | step      |      | -32 .. 31   | `channelN:STEP {value}`      |
//!
//! Writes to `voltage` are read back, so the cached value is what the DAC
//! actually outputs after quantisation.

use super::ConnectOptions;
use crate::error::AppResult;
use crate::instrument::{ChannelMut, Instrument, InstrumentBuilder};
use crate::parameter::{ParameterSpec, Validator, Value};
use crate::snapshot::Snapshot;
use crate::transport::{sim, Transport};
use std::time::Duration;
use tracing::info;

/// Number of output channels.
pub const CHANNEL_COUNT: usize = 8;

/// The Arduino resets when the port opens.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(3);

/// Parameters of channel `n` (1-based).
pub fn channel_parameters(n: usize) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("voltage")
            .label(format!("Channel {n} voltage"))
            .unit("V")
            .get_cmd(format!("channel{n}:VOLTAGE?"))
            .set_cmd(format!("channel{n}:VOLTAGE {{value}}"))
            .validator(Validator::Numbers {
                min: -10.0,
                max: 10.0,
            })
            .confirm_set(),
        ParameterSpec::new("offset")
            .label(format!("Channel {n} offset"))
            .set_cmd(format!("channel{n}:OFFSET {{value}}"))
            .validator(Validator::Ints { min: -128, max: 127 }),
        ParameterSpec::new("step")
            .label(format!("Channel {n} step"))
            .set_cmd(format!("channel{n}:STEP {{value}}"))
            .validator(Validator::Ints { min: -32, max: 31 }),
    ]
}

/// Declaration of the whole box.
pub fn builder(name: impl Into<String>) -> InstrumentBuilder {
    (1..=CHANNEL_COUNT).fold(
        InstrumentBuilder::new(name).boot_delay(DEFAULT_BOOT_DELAY),
        |builder, n| builder.channel(format!("channel{n}"), channel_parameters(n)),
    )
}

/// Driver for the DC DAC.
#[derive(Debug)]
pub struct DcDac5764 {
    inner: Instrument,
}

impl DcDac5764 {
    /// Connect over `transport`.
    pub fn connect<T: Transport + 'static>(
        transport: T,
        options: &ConnectOptions,
    ) -> AppResult<Self> {
        let builder = options.apply(builder(options.name.clone()));
        let mut dac = Self {
            inner: builder.connect(transport)?,
        };
        options.configure(&mut dac.inner)?;
        if options.reset {
            dac.reset()?;
        }
        Ok(dac)
    }

    /// Connect to the in-memory simulation.
    pub fn simulated(name: impl Into<String>) -> AppResult<Self> {
        Self::connect(
            sim::dcdac5764(),
            &ConnectOptions::new(name).boot_delay(Duration::ZERO),
        )
    }

    /// The underlying instrument.
    pub fn instrument(&self) -> &Instrument {
        &self.inner
    }

    /// Mutable access to the declared parameters.
    pub fn instrument_mut(&mut self) -> &mut Instrument {
        &mut self.inner
    }

    /// Give up the driver, keeping the connection.
    pub fn into_instrument(self) -> Instrument {
        self.inner
    }

    /// Accessor for `channel1` .. `channel8`.
    pub fn channel(&mut self, name: &str) -> AppResult<ChannelMut<'_>> {
        self.inner.channel_named(name)
    }

    /// Output voltage of a channel.
    pub fn voltage(&mut self, channel: &str) -> AppResult<f64> {
        self.channel(channel)?.voltage()
    }

    /// Set the output voltage of a channel; returns the read-back value.
    pub fn set_voltage(&mut self, channel: &str, volts: f64) -> AppResult<f64> {
        self.channel(channel)?.set_voltage(volts)
    }

    /// Write the offset calibration register of a channel.
    pub fn set_offset(&mut self, channel: &str, offset: i64) -> AppResult<()> {
        self.channel(channel)?.set("offset", Value::Int(offset))?;
        Ok(())
    }

    /// Write the step calibration register of a channel.
    pub fn set_step(&mut self, channel: &str, step: i64) -> AppResult<()> {
        self.channel(channel)?.set("step", Value::Int(step))?;
        Ok(())
    }

    /// Reset the box, zero every calibration register and return a fresh
    /// snapshot.
    pub fn reset(&mut self) -> AppResult<Snapshot> {
        self.inner.write("*RST")?;
        self.inner.invalidate_cache();
        for index in 0..CHANNEL_COUNT {
            let mut channel = self.inner.channel(index)?;
            channel.set("offset", Value::Int(0))?;
            channel.set("step", Value::Int(0))?;
        }
        info!("[{}] Reset complete", self.inner.name());
        Ok(self.inner.snapshot(true))
    }

    /// Report every channel.
    pub fn snapshot(&mut self, update: bool) -> Snapshot {
        self.inner.snapshot(update)
    }

    /// Close the connection.
    pub fn close(&mut self) -> AppResult<()> {
        self.inner.close()
    }
}
