//! Instrument lifecycle and uniform parameter access.
//!
//! An [`Instrument`] exclusively owns one [`Transport`]. It holds the
//! instrument-level parameters and a list of [`Channel`]s, each with its own
//! parameters. Every parameter, wherever it lives, is reached through one
//! [`ParamAddress`] and the same get/set path.
//!
//! Instruments are declared with an [`InstrumentBuilder`] and come alive in
//! [`InstrumentBuilder::connect`], which waits for the device to boot and
//! performs the `*IDN?` handshake.
//!
//! ```rust
//! use barrera_lab_drivers::instrument::InstrumentBuilder;
//! use barrera_lab_drivers::parameter::{ParameterSpec, Validator};
//! use barrera_lab_drivers::transport::sim;
//!
//! let mut dac = InstrumentBuilder::new("dac")
//!     .channel(
//!         "channel1",
//!         [ParameterSpec::new("voltage")
//!             .unit("V")
//!             .get_cmd("channel1:VOLTAGE?")
//!             .set_cmd("channel1:VOLTAGE {value}")
//!             .validator(Validator::Numbers { min: -10.0, max: 10.0 })],
//!     )
//!     .connect(sim::dcdac5764())
//!     .unwrap();
//!
//! assert_eq!(dac.identity().vendor.as_deref(), Some("BARRERA"));
//! dac.channel(0).unwrap().set_voltage(1.0).unwrap();
//! ```

use crate::error::{AppResult, DriverError};
use crate::parameter::{ParamAddress, Parameter, ParameterSet, ParameterSpec, Value};
use crate::snapshot::{Snapshot, SnapshotRow, SnapshotValue};
use crate::transport::Transport;
use prse::try_parse;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fields of an `*IDN?` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Manufacturer.
    pub vendor: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Serial number.
    pub serial: Option<String>,
    /// Firmware version.
    pub firmware: Option<String>,
    /// The reply as received.
    pub raw: String,
}

impl Identity {
    /// Parse `vendor,model,serial,firmware`. Missing or empty fields are
    /// `None`; the firmware field keeps any further commas.
    pub fn parse(idn: &str) -> Self {
        let raw = idn.trim().to_string();
        let parsed: Result<(String, String, String, String), _> =
            try_parse!(raw.as_str(), "{},{},{},{}");

        let fields: Vec<Option<String>> = match parsed {
            Ok((vendor, model, serial, firmware)) => [vendor, model, serial, firmware]
                .into_iter()
                .map(non_empty)
                .collect(),
            Err(_) => raw
                .splitn(4, ',')
                .map(|field| non_empty(field.to_string()))
                .collect(),
        };
        let mut fields = fields.into_iter().chain(std::iter::repeat(None));

        Self {
            vendor: fields.next().flatten(),
            model: fields.next().flatten(),
            serial: fields.next().flatten(),
            firmware: fields.next().flatten(),
            raw,
        }
    }

    /// Line logged after a successful handshake.
    pub fn connect_message(&self, elapsed: Duration) -> String {
        format!("Connected to: {} in {:.2}s", self, elapsed.as_secs_f64())
    }
}

fn non_empty(field: String) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |field: &Option<String>| field.clone().unwrap_or_else(|| "?".to_string());
        write!(
            f,
            "{} {} (serial:{}, firmware:{})",
            show(&self.vendor),
            show(&self.model),
            show(&self.serial),
            show(&self.firmware)
        )
    }
}

/// One addressable line of an instrument and its parameters.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    parameters: ParameterSet,
}

impl Channel {
    /// Channel called `name` with the given parameters.
    pub fn new(name: impl Into<String>, specs: impl IntoIterator<Item = ParameterSpec>) -> Self {
        Self {
            name: name.into(),
            parameters: specs.into_iter().collect(),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters of the channel.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Cached value of a channel parameter.
    pub fn cached(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).and_then(Parameter::cached)
    }
}

/// Declaration of an instrument before it is connected.
#[derive(Debug, Clone)]
pub struct InstrumentBuilder {
    name: String,
    parameters: ParameterSet,
    channels: Vec<Channel>,
    boot_delay: Duration,
}

impl InstrumentBuilder {
    /// Empty declaration without boot delay.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: ParameterSet::new(),
            channels: Vec::new(),
            boot_delay: Duration::ZERO,
        }
    }

    /// Add an instrument-level parameter.
    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.add(spec);
        self
    }

    /// Add a channel with its parameters.
    pub fn channel(
        mut self,
        name: impl Into<String>,
        specs: impl IntoIterator<Item = ParameterSpec>,
    ) -> Self {
        self.channels.push(Channel::new(name, specs));
        self
    }

    /// Time to wait after opening the port before the first command. Boards
    /// that reset when the port opens need a few seconds.
    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Take ownership of `transport`, wait for the device and identify it.
    pub fn connect<T: Transport + 'static>(self, transport: T) -> AppResult<Instrument> {
        self.connect_boxed(Box::new(transport))
    }

    /// Same as [`connect`](Self::connect) for an already boxed transport.
    pub fn connect_boxed(self, mut transport: Box<dyn Transport>) -> AppResult<Instrument> {
        let begin = Instant::now();
        if !self.boot_delay.is_zero() {
            debug!(
                "[{}] Waiting {:?} for the device to boot",
                self.name, self.boot_delay
            );
            thread::sleep(self.boot_delay);
        }

        let idn = match transport.query("*IDN?") {
            Ok(idn) => idn,
            Err(e) => {
                let _ = transport.close();
                return Err(e);
            }
        };
        let identity = Identity::parse(&idn);
        info!("[{}] {}", self.name, identity.connect_message(begin.elapsed()));

        Ok(Instrument {
            name: self.name,
            transport,
            identity,
            parameters: self.parameters,
            channels: self.channels,
        })
    }
}

/// A connected instrument.
pub struct Instrument {
    name: String,
    transport: Box<dyn Transport>,
    identity: Identity,
    parameters: ParameterSet,
    channels: Vec<Channel>,
}

impl Instrument {
    /// Name used in logs and snapshots.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identification obtained during connect.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Send a raw command.
    pub fn write(&mut self, command: &str) -> AppResult<()> {
        self.transport.write_line(command)
    }

    /// Send a raw command and return the reply line.
    pub fn ask(&mut self, command: &str) -> AppResult<String> {
        self.transport.query(command)
    }

    /// Reply timeout of the transport.
    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    /// Change the reply timeout. A zero timeout is rejected.
    pub fn set_timeout(&mut self, timeout: Duration) -> AppResult<()> {
        if timeout.is_zero() {
            return Err(DriverError::validation("timeout", "must be greater than zero"));
        }
        self.transport.set_timeout(timeout)
    }

    /// Instrument-level parameters.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Cached value of an instrument-level parameter.
    pub fn cached(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).and_then(Parameter::cached)
    }

    /// Read an instrument-level parameter.
    pub fn get(&mut self, name: &str) -> AppResult<Value> {
        self.access_at(&ParamAddress::instrument(name), None)
    }

    /// Write an instrument-level parameter.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> AppResult<Value> {
        self.access_at(&ParamAddress::instrument(name), Some(value.into()))
    }

    /// Read any parameter.
    pub fn get_at(&mut self, address: &ParamAddress) -> AppResult<Value> {
        self.access_at(address, None)
    }

    /// Write any parameter.
    pub fn set_at(&mut self, address: &ParamAddress, value: impl Into<Value>) -> AppResult<Value> {
        self.access_at(address, Some(value.into()))
    }

    /// Parameter at `address`, without touching the device.
    pub fn parameter_at(&self, address: &ParamAddress) -> AppResult<&Parameter> {
        let parameters = match address {
            ParamAddress::Instrument(_) => &self.parameters,
            ParamAddress::Channel { index, .. } => {
                &self
                    .channels
                    .get(*index)
                    .ok_or_else(|| DriverError::UnknownChannel(index.to_string()))?
                    .parameters
            }
        };
        parameters
            .get(address.name())
            .ok_or_else(|| DriverError::UnknownParameter(address.name().to_string()))
    }

    /// Read (`None`) or write (`Some`) any parameter.
    pub fn access_at(&mut self, address: &ParamAddress, value: Option<Value>) -> AppResult<Value> {
        let parameters = match address {
            ParamAddress::Instrument(_) => &mut self.parameters,
            ParamAddress::Channel { index, .. } => {
                &mut self
                    .channels
                    .get_mut(*index)
                    .ok_or_else(|| DriverError::UnknownChannel(index.to_string()))?
                    .parameters
            }
        };
        parameters
            .get_mut(address.name())?
            .access(self.transport.as_mut(), value)
    }

    /// Read or write through a parameter built on the fly, for settings whose
    /// command depends on instrument state. Nothing is cached.
    pub fn access_transient(
        &mut self,
        spec: ParameterSpec,
        value: Option<Value>,
    ) -> AppResult<Value> {
        Parameter::new(spec).access(self.transport.as_mut(), value)
    }

    /// Forget every cached value, e.g. after the device was reset.
    pub fn invalidate_cache(&mut self) {
        let channel_parameters = self.channels.iter_mut().flat_map(|c| c.parameters.iter_mut());
        for parameter in self.parameters.iter_mut().chain(channel_parameters) {
            parameter.invalidate();
        }
    }

    /// Channels in declaration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Index of the channel called `name`.
    pub fn channel_index(&self, name: &str) -> AppResult<usize> {
        self.channels
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DriverError::UnknownChannel(name.to_string()))
    }

    /// Accessor for the channel at `index` (0-based).
    pub fn channel(&mut self, index: usize) -> AppResult<ChannelMut<'_>> {
        if index >= self.channels.len() {
            return Err(DriverError::UnknownChannel(index.to_string()));
        }
        Ok(ChannelMut {
            instrument: self,
            index,
        })
    }

    /// Accessor for the channel called `name`.
    pub fn channel_named(&mut self, name: &str) -> AppResult<ChannelMut<'_>> {
        let index = self.channel_index(name)?;
        self.channel(index)
    }

    /// Report every parameter.
    ///
    /// With `update`, gettable parameters are queried (refreshing their
    /// caches); otherwise the cached values are reported. Set-only parameters
    /// always report their cache.
    pub fn snapshot(&mut self, update: bool) -> Snapshot {
        let mut snapshot = Snapshot::new(self.name.clone());
        snapshot.push(SnapshotRow::new(
            "IDN",
            SnapshotValue::Value(Value::Text(self.identity.raw.clone())),
            "",
        ));
        snapshot.push(SnapshotRow::new(
            "timeout",
            SnapshotValue::Value(Value::Float(self.transport.timeout().as_secs_f64())),
            "s",
        ));

        let transport = self.transport.as_mut();
        for parameter in self.parameters.iter_mut() {
            let path = parameter.name().to_string();
            snapshot.push(snapshot_row(&self.name, path, parameter, transport, update));
        }
        for channel in &mut self.channels {
            for parameter in channel.parameters.iter_mut() {
                let path = format!("{}.{}", channel.name, parameter.name());
                snapshot.push(snapshot_row(&self.name, path, parameter, transport, update));
            }
        }
        snapshot
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Release the transport. Later I/O fails with
    /// [`DriverError::Disconnected`].
    pub fn close(&mut self) -> AppResult<()> {
        if self.transport.is_closed() {
            return Ok(());
        }
        self.transport.close()?;
        info!("[{}] Connection closed", self.name);
        Ok(())
    }
}

fn snapshot_row(
    instrument: &str,
    path: String,
    parameter: &mut Parameter,
    transport: &mut dyn Transport,
    update: bool,
) -> SnapshotRow {
    let unit = parameter.unit().to_string();
    let value = if update && parameter.spec().is_gettable() {
        match parameter.get(transport) {
            Ok(v) => SnapshotValue::Value(v),
            Err(e) => {
                warn!("[{}] Snapshot of '{}' failed: {}", instrument, path, e);
                SnapshotValue::Failed(e.to_string())
            }
        }
    } else {
        match parameter.cached() {
            Some(v) => SnapshotValue::Value(v.clone()),
            None => SnapshotValue::Unset,
        }
    };
    SnapshotRow::new(path, value, unit)
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("[{}] Failed to close connection: {}", self.name, e);
        }
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("transport", &self.transport.describe())
            .field("identity", &self.identity)
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Borrowed accessor for one channel of an [`Instrument`].
pub struct ChannelMut<'a> {
    instrument: &'a mut Instrument,
    index: usize,
}

impl ChannelMut<'_> {
    /// Channel name.
    pub fn name(&self) -> &str {
        &self.instrument.channels[self.index].name
    }

    /// Position among the instrument's channels.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Address of a parameter of this channel.
    pub fn address(&self, parameter: &str) -> ParamAddress {
        ParamAddress::channel(self.index, parameter)
    }

    /// Read a channel parameter.
    pub fn get(&mut self, parameter: &str) -> AppResult<Value> {
        self.access(parameter, None)
    }

    /// Write a channel parameter.
    pub fn set(&mut self, parameter: &str, value: impl Into<Value>) -> AppResult<Value> {
        self.access(parameter, Some(value.into()))
    }

    /// Read (`None`) or write (`Some`) a channel parameter.
    pub fn access(&mut self, parameter: &str, value: Option<Value>) -> AppResult<Value> {
        let address = self.address(parameter);
        self.instrument.access_at(&address, value)
    }

    /// Cached value of a channel parameter.
    pub fn cached(&self, parameter: &str) -> Option<&Value> {
        self.instrument.channels[self.index].cached(parameter)
    }

    /// Read the `voltage` parameter.
    pub fn voltage(&mut self) -> AppResult<f64> {
        let value = self.get("voltage")?;
        value
            .as_f64()
            .ok_or_else(|| DriverError::malformed("voltage", value.to_string()))
    }

    /// Write the `voltage` parameter, returning the value the device reports.
    pub fn set_voltage(&mut self, volts: f64) -> AppResult<f64> {
        let value = self.set("voltage", volts)?;
        value
            .as_f64()
            .ok_or_else(|| DriverError::malformed("voltage", value.to_string()))
    }
}
