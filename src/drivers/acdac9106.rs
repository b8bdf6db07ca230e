//! Barrera AC DAC box built around the AD9106.
//!
//! Four sine outputs `ch1` .. `ch4` (device prefix `CHAN1` .. `CHAN4`) sharing
//! one frequency. Every write that changes the waveform is followed by
//! `PAT:UPDATE` in the same line so the pattern generator picks it up.

use super::ConnectOptions;
use crate::error::{AppResult, DriverError};
use crate::instrument::{ChannelMut, Instrument, InstrumentBuilder};
use crate::parameter::{ParameterSpec, ReplyParser, Validator, Value};
use crate::snapshot::Snapshot;
use crate::transport::{sim, Transport};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Number of output channels.
pub const CHANNEL_COUNT: usize = 4;

/// The Arduino resets when the port opens.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(3);

/// What the front panel display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// All channels on screen.
    Normal,
    /// Zoom on one channel (1..=4).
    Focus(u8),
    /// Panel locked while under computer control.
    Remote,
}

impl DisplayMode {
    const TOKENS: [(&'static str, &'static str); 6] = [
        ("NORMAL", "0"),
        ("FOCUS1", "1"),
        ("FOCUS2", "2"),
        ("FOCUS3", "3"),
        ("FOCUS4", "4"),
        ("REMOTE", "5"),
    ];

    /// Label used by the `display_mode` parameter, e.g. `FOCUS2`.
    pub fn label(&self) -> String {
        match self {
            DisplayMode::Normal => "NORMAL".to_string(),
            DisplayMode::Focus(n) => format!("FOCUS{n}"),
            DisplayMode::Remote => "REMOTE".to_string(),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for DisplayMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(DisplayMode::Normal),
            "REMOTE" => Ok(DisplayMode::Remote),
            _ => s
                .strip_prefix("FOCUS")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=4).contains(n))
                .map(DisplayMode::Focus)
                .ok_or_else(|| {
                    DriverError::validation("display_mode", format!("unknown mode {s}"))
                }),
        }
    }
}

/// Parameters of channel `n` (1-based).
pub fn channel_parameters(n: usize) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("voltage")
            .label(format!("Channel {n} amplitude"))
            .unit("mV")
            .get_cmd(format!("CHAN{n}:VOLTAGE?"))
            .set_cmd(format!("CHAN{n}:VOLTAGE {{value}};PAT:UPDATE"))
            .validator(Validator::Numbers {
                min: 0.0,
                max: 450.0,
            }),
        ParameterSpec::new("phase")
            .label(format!("Channel {n} phase"))
            .unit("deg")
            .get_cmd(format!("CHAN{n}:PHASE?"))
            .set_cmd(format!("CHAN{n}:PHASE {{value}};PAT:UPDATE"))
            .validator(Validator::Numbers {
                min: -180.0,
                max: 180.0,
            }),
    ]
}

/// Declaration of the whole box.
pub fn builder(name: impl Into<String>) -> InstrumentBuilder {
    let builder = InstrumentBuilder::new(name)
        .boot_delay(DEFAULT_BOOT_DELAY)
        .parameter(
            ParameterSpec::new("frequency")
                .unit("Hz")
                .get_cmd("FREQ?")
                .set_cmd("FREQ {value};PAT:UPDATE")
                .validator(Validator::Numbers { min: 0.0, max: 1e6 }),
        )
        .parameter(
            ParameterSpec::new("error")
                .get_cmd("SYS:ERR?")
                .parser(ReplyParser::Text),
        )
        .parameter(
            ParameterSpec::new("display_mode")
                .set_cmd("SYS:DISP:MODE {value}")
                .mapping(DisplayMode::TOKENS),
        );

    (1..=CHANNEL_COUNT).fold(builder, |builder, n| {
        builder.channel(format!("ch{n}"), channel_parameters(n))
    })
}

/// Driver for the AC DAC.
#[derive(Debug)]
pub struct AcDac9106 {
    inner: Instrument,
}

impl AcDac9106 {
    /// Connect over `transport` and put the front panel in remote mode.
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
        } else {
            dac.set_display_mode(DisplayMode::Remote)?;
        }
        Ok(dac)
    }

    /// Connect to the in-memory simulation.
    pub fn simulated(name: impl Into<String>) -> AppResult<Self> {
        Self::connect(
            sim::acdac9106(),
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

    /// Accessor for `ch1` .. `ch4`.
    pub fn channel(&mut self, name: &str) -> AppResult<ChannelMut<'_>> {
        self.inner.channel_named(name)
    }

    /// Output frequency shared by all channels, Hz.
    pub fn frequency(&mut self) -> AppResult<f64> {
        float(self.inner.get("frequency")?, "FREQ?")
    }

    /// Set the output frequency, 0 to 1 MHz.
    pub fn set_frequency(&mut self, hz: f64) -> AppResult<()> {
        self.inner.set("frequency", hz)?;
        Ok(())
    }

    /// Amplitude of a channel, mV.
    pub fn voltage(&mut self, channel: &str) -> AppResult<f64> {
        self.channel(channel)?.voltage()
    }

    /// Set the amplitude of a channel, 0 to 450 mV.
    pub fn set_voltage(&mut self, channel: &str, millivolts: f64) -> AppResult<()> {
        self.channel(channel)?.set_voltage(millivolts)?;
        Ok(())
    }

    /// Phase of a channel, degrees.
    pub fn phase(&mut self, channel: &str) -> AppResult<f64> {
        let value = self.channel(channel)?.get("phase")?;
        float(value, "PHASE?")
    }

    /// Set the phase of a channel, -180 to 180 degrees.
    pub fn set_phase(&mut self, channel: &str, degrees: f64) -> AppResult<()> {
        self.channel(channel)?.set("phase", degrees)?;
        Ok(())
    }

    /// Oldest entry of the device error queue.
    pub fn error(&mut self) -> AppResult<String> {
        Ok(self.inner.get("error")?.to_string())
    }

    /// Last display mode written, if any.
    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.inner
            .cached("display_mode")
            .and_then(Value::as_str)
            .and_then(|label| label.parse().ok())
    }

    /// Switch the front panel display.
    pub fn set_display_mode(&mut self, mode: DisplayMode) -> AppResult<()> {
        self.inner.set("display_mode", mode.label())?;
        Ok(())
    }

    /// Reset the box, return to remote display mode and report a fresh
    /// snapshot.
    pub fn reset(&mut self) -> AppResult<Snapshot> {
        self.inner.write("*RST")?;
        self.inner.invalidate_cache();
        self.set_display_mode(DisplayMode::Remote)?;
        info!("[{}] Reset complete", self.inner.name());
        Ok(self.inner.snapshot(true))
    }

    /// Report the box and its four channels.
    pub fn snapshot(&mut self, update: bool) -> Snapshot {
        self.inner.snapshot(update)
    }

    /// Close the connection.
    pub fn close(&mut self) -> AppResult<()> {
        self.inner.close()
    }
}

fn float(value: Value, command: &str) -> AppResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DriverError::malformed(command, value.to_string()))
}
