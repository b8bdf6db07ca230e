//! Keithley DMM6500 bench multimeter (SCPI command set).
//!
//! Settings such as integration time or averaging live under the current
//! measurement function (`VOLT:DC:NPLC`, `CURR:AC:AVER:COUN`, ...). They are
//! exposed as methods that look the function up first instead of as fixed
//! parameters, and [`Keithley6500::snapshot`] appends one row per setting
//! after the fixed ones.

use super::ConnectOptions;
use crate::error::{AppResult, DriverError};
use crate::instrument::{Instrument, InstrumentBuilder};
use crate::parameter::{ParameterSpec, ReplyParser, Validator, Value};
use crate::snapshot::{Snapshot, SnapshotRow, SnapshotValue};
use crate::transport::Transport;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Measurement functions and their SCPI names.
pub const MODES: [(&str, &str); 8] = [
    ("ac current", "CURR:AC"),
    ("dc current", "CURR:DC"),
    ("ac voltage", "VOLT:AC"),
    ("dc voltage", "VOLT:DC"),
    ("2w resistance", "RES"),
    ("4w resistance", "FRES"),
    ("temperature", "TEMP"),
    ("frequency", "FREQ"),
];

const BACKLIGHT: [(&str, &str); 6] = [
    ("On 100", "ON100"),
    ("On 75", "ON75"),
    ("On 50", "ON50"),
    ("On 25", "ON25"),
    ("Off", "OFF"),
    ("Blackout", "BLACkout"),
];

const TRIGGER_SOURCES: [(&str, &str); 11] = [
    ("immediate", "NONE"),
    ("timer1", "TIM1"),
    ("timer2", "TIM2"),
    ("timer3", "TIM3"),
    ("timer4", "TIM4"),
    ("notify1", "NOT1"),
    ("notify2", "NOT2"),
    ("notify3", "NOT3"),
    ("front-panel", "DISP"),
    ("bus", "COMM"),
    ("external", "EXT"),
];

const INPUT_IMPEDANCE: [(&str, &str); 2] = [("10", "MOHM10"), ("auto", "AUTO")];

/// Settings stored under the measurement function as `<FUNC>:<suffix>`:
/// name, header suffix, reply parser.
const MODE_SETTINGS: [(&str, &str, ReplyParser); 6] = [
    ("nplc", "NPLC", ReplyParser::Float),
    ("range", "RANG", ReplyParser::Float),
    ("auto_range_enabled", "RANG:AUTO", ReplyParser::Bool),
    ("averaging_type", "AVER:TCON", ReplyParser::CleanText),
    ("averaging_count", "AVER:COUN", ReplyParser::RoundedInt),
    ("averaging_enabled", "AVER:STAT", ReplyParser::Bool),
];

/// Declaration of the meter's fixed parameters.
pub fn builder(name: impl Into<String>) -> InstrumentBuilder {
    let mut builder = InstrumentBuilder::new(name)
        .parameter(
            ParameterSpec::new("mode")
                .get_cmd("SENS:FUNC?")
                .set_cmd("SENS:FUNC '{value}'")
                .mapping(MODES),
        )
        .parameter(
            ParameterSpec::new("digits")
                .get_cmd("DISP:VOLT:DC:DIG?")
                .set_cmd("DISP:VOLT:DC:DIG {value}")
                .validator(Validator::Ints { min: 4, max: 7 })
                .parser(ReplyParser::Int),
        )
        .parameter(
            ParameterSpec::new("display_backlight")
                .get_cmd("DISP:LIGH:STAT?")
                .set_cmd("DISP:LIGH:STAT {value}")
                .mapping(BACKLIGHT),
        )
        .parameter(
            ParameterSpec::new("trigger_count")
                .get_cmd("ROUT:SCAN:COUN:SCAN?")
                .set_cmd("ROUT:SCAN:COUN:SCAN {value}")
                .validator(Validator::MultiType(vec![
                    Validator::Ints { min: 1, max: 9999 },
                    Validator::one_of(["inf", "default", "minimum", "maximum"]),
                ]))
                .parser(ReplyParser::RoundedInt),
        );

    for n in 1..=4 {
        builder = builder
            .parameter(
                ParameterSpec::new(format!("trigger{n}_delay"))
                    .unit("s")
                    .get_cmd(format!("TRIG:TIM{n}:DEL?"))
                    .set_cmd(format!("TRIG:TIM{n}:DEL {{value}}"))
                    .validator(Validator::Numbers {
                        min: 0.0,
                        max: 999_999.999,
                    }),
            )
            .parameter(
                ParameterSpec::new(format!("trigger{n}_source"))
                    .get_cmd(format!("TRIG:TIM{n}:STAR:STIM?"))
                    .set_cmd(format!("TRIG:TIM{n}:STAR:STIM {{value}}"))
                    .mapping(TRIGGER_SOURCES),
            );
    }

    builder
        .parameter(
            ParameterSpec::new("trigger_timer")
                .unit("s")
                .get_cmd("ROUT:SCAN:INT?")
                .set_cmd("ROUT:SCAN:INT {value}")
                .validator(Validator::Numbers {
                    min: 0.0,
                    max: 999_999.999,
                }),
        )
        .parameter(
            ParameterSpec::new("amplitude")
                .label("Measured value")
                .unit("a.u.")
                .get_cmd("READ?"),
        )
}

/// Averaging filter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragingType {
    /// Moving average over the last readings.
    Moving,
    /// Average of a fresh batch of readings.
    Repeat,
}

impl AveragingType {
    fn as_str(&self) -> &'static str {
        match self {
            AveragingType::Moving => "moving",
            AveragingType::Repeat => "repeat",
        }
    }
}

/// Driver for the DMM6500.
#[derive(Debug)]
pub struct Keithley6500 {
    inner: Instrument,
    /// Last known mode-dependent settings, keyed by full header.
    mode_cache: HashMap<String, Value>,
}

impl Keithley6500 {
    /// Connect, check the command set and switch to ASCII data.
    ///
    /// # Errors
    /// [`DriverError::CommandSet`] when the meter is in TSP mode.
    pub fn connect<T: Transport + 'static>(
        transport: T,
        options: &ConnectOptions,
    ) -> AppResult<Self> {
        let builder = options.apply(builder(options.name.clone()));
        let mut inner = builder.connect(transport)?;
        options.configure(&mut inner)?;

        let language = inner.ask("*LANG?")?;
        let language = language.trim();
        if language != "SCPI" {
            return Err(DriverError::CommandSet {
                expected: "SCPI".to_string(),
                found: language.to_string(),
            });
        }

        let mut dmm = Self {
            inner,
            mode_cache: HashMap::new(),
        };
        if options.reset {
            dmm.reset()?;
        }
        dmm.inner.write("FORM:DATA ASCII")?;
        Ok(dmm)
    }

    /// The underlying instrument.
    pub fn instrument(&self) -> &Instrument {
        &self.inner
    }

    /// Mutable access to the fixed parameters.
    pub fn instrument_mut(&mut self) -> &mut Instrument {
        &mut self.inner
    }

    /// Give up the driver, keeping the connection.
    pub fn into_instrument(self) -> Instrument {
        self.inner
    }

    /// Current measurement function, e.g. `dc voltage`.
    pub fn mode(&mut self) -> AppResult<String> {
        Ok(self.inner.get("mode")?.to_string())
    }

    /// Switch the measurement function by label, e.g. `ac current`.
    pub fn set_mode(&mut self, mode: &str) -> AppResult<()> {
        self.inner.set("mode", mode)?;
        Ok(())
    }

    /// Take one reading in the current mode.
    pub fn amplitude(&mut self) -> AppResult<f64> {
        let value = self.inner.get("amplitude")?;
        value
            .as_f64()
            .ok_or_else(|| DriverError::malformed("READ?", value.to_string()))
    }

    /// Integration time in power line cycles.
    pub fn nplc(&mut self) -> AppResult<f64> {
        let value = self.mode_setting("nplc", Validator::Any, None)?;
        as_float(value, "NPLC")
    }

    /// Set the integration time, 0.01 to 10 power line cycles.
    pub fn set_nplc(&mut self, nplc: f64) -> AppResult<()> {
        let bounds = Validator::Numbers {
            min: 0.01,
            max: 10.0,
        };
        self.mode_setting("nplc", bounds, Some(nplc.into()))?;
        Ok(())
    }

    /// Measurement range in the unit of the current mode.
    pub fn range(&mut self) -> AppResult<f64> {
        let value = self.mode_setting("range", Validator::Any, None)?;
        as_float(value, "RANG")
    }

    /// Set the measurement range of the current mode.
    pub fn set_range(&mut self, range: f64) -> AppResult<()> {
        let bounds = Validator::Numbers {
            min: 0.0,
            max: f64::MAX,
        };
        self.mode_setting("range", bounds, Some(range.into()))?;
        Ok(())
    }

    /// Whether the current mode picks its range automatically.
    pub fn auto_range_enabled(&mut self) -> AppResult<bool> {
        let value = self.mode_setting("auto_range_enabled", Validator::Bool, None)?;
        as_bool(value, "RANG:AUTO")
    }

    /// Turn automatic ranging of the current mode on or off.
    pub fn set_auto_range_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.mode_setting("auto_range_enabled", Validator::Bool, Some(enabled.into()))?;
        Ok(())
    }

    /// Averaging filter of the current mode.
    pub fn averaging_type(&mut self) -> AppResult<AveragingType> {
        let value = self.mode_setting("averaging_type", Validator::Any, None)?;
        match value.as_str() {
            Some("moving") => Ok(AveragingType::Moving),
            Some("repeat") => Ok(AveragingType::Repeat),
            _ => Err(DriverError::malformed("AVER:TCON", value.to_string())),
        }
    }

    /// Select the averaging filter of the current mode.
    pub fn set_averaging_type(&mut self, kind: AveragingType) -> AppResult<()> {
        let choices = Validator::one_of(["moving", "repeat"]);
        self.mode_setting("averaging_type", choices, Some(kind.as_str().into()))?;
        Ok(())
    }

    /// Number of readings averaged, 1 to 100.
    pub fn averaging_count(&mut self) -> AppResult<i64> {
        let value = self.mode_setting("averaging_count", Validator::Any, None)?;
        value
            .as_i64()
            .ok_or_else(|| DriverError::malformed("AVER:COUN", value.to_string()))
    }

    /// Set the number of readings averaged, 1 to 100.
    pub fn set_averaging_count(&mut self, count: i64) -> AppResult<()> {
        let bounds = Validator::Ints { min: 1, max: 100 };
        self.mode_setting("averaging_count", bounds, Some(count.into()))?;
        Ok(())
    }

    /// Whether averaging is on in the current mode.
    pub fn averaging_enabled(&mut self) -> AppResult<bool> {
        let value = self.mode_setting("averaging_enabled", Validator::Bool, None)?;
        as_bool(value, "AVER:STAT")
    }

    /// Turn averaging of the current mode on or off.
    pub fn set_averaging_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.mode_setting("averaging_enabled", Validator::Bool, Some(enabled.into()))?;
        Ok(())
    }

    /// Input impedance in dc voltage mode: `10` (MΩ) or `auto`.
    pub fn input_impedance(&mut self) -> AppResult<String> {
        let spec = self.input_impedance_spec()?;
        Ok(self.inner.access_transient(spec, None)?.to_string())
    }

    /// Select `10` (MΩ) or `auto`; dc voltage mode only.
    pub fn set_input_impedance(&mut self, impedance: &str) -> AppResult<()> {
        let spec = self.input_impedance_spec()?;
        self.inner.access_transient(spec, Some(impedance.into()))?;
        Ok(())
    }

    /// Start the configured trigger model.
    pub fn trigger(&mut self) -> AppResult<()> {
        self.inner.write("INIT")
    }

    /// Load the duration loop trigger model and run it, blocking the meter
    /// until it finishes.
    pub fn continuous_measure(&mut self) -> AppResult<()> {
        self.inner.write(":TRIG:LOAD \"DurationLoop\", 10, 0.01")?;
        self.inner.write("INIT")?;
        self.inner.write("*WAI")
    }

    /// Restore factory defaults.
    pub fn reset(&mut self) -> AppResult<()> {
        self.inner.write("*RST")?;
        self.inner.invalidate_cache();
        self.mode_cache.clear();
        info!("[{}] Reset complete", self.inner.name());
        Ok(())
    }

    /// Fixed parameters followed by the settings of the current mode.
    ///
    /// With `update` the mode-dependent rows are read from the meter under
    /// the mode the fixed rows just reported; without it they come from the
    /// last values seen in the cached mode.
    pub fn snapshot(&mut self, update: bool) -> Snapshot {
        let mut snapshot = self.inner.snapshot(update);
        // a failed mode read leaves an older mode in the cache
        let mode_known = !update
            || snapshot
                .value("mode")
                .and_then(SnapshotValue::value)
                .is_some();
        let token = self.cached_mode_token().filter(|_| mode_known);

        for (name, suffix, _) in MODE_SETTINGS {
            let value = match token {
                None if update => {
                    SnapshotValue::Failed("measurement function unknown".to_string())
                }
                None => SnapshotValue::Unset,
                Some(token) if update => {
                    match self.mode_setting_in(token, name, Validator::Any, None) {
                        Ok(v) => SnapshotValue::Value(v),
                        Err(e) => {
                            warn!("[{}] Snapshot of '{}' failed: {}", self.inner.name(), name, e);
                            SnapshotValue::Failed(e.to_string())
                        }
                    }
                }
                Some(token) => self
                    .mode_cache
                    .get(&format!("{token}:{suffix}"))
                    .cloned()
                    .map_or(SnapshotValue::Unset, SnapshotValue::Value),
            };
            snapshot.push(SnapshotRow::new(name, value, ""));
        }
        snapshot
    }

    /// Close the connection.
    pub fn close(&mut self) -> AppResult<()> {
        self.inner.close()
    }

    /// SCPI name of the current measurement function.
    fn mode_token(&mut self) -> AppResult<&'static str> {
        let mode = self.mode()?;
        MODES
            .iter()
            .find(|(label, _)| *label == mode)
            .map(|(_, token)| *token)
            .ok_or_else(|| DriverError::malformed("SENS:FUNC?", mode))
    }

    /// SCPI name of the mode held in the cache, if it is a known one.
    fn cached_mode_token(&self) -> Option<&'static str> {
        let mode = self.inner.cached("mode").and_then(Value::as_str)?;
        MODES
            .iter()
            .find(|(label, _)| *label == mode)
            .map(|(_, token)| *token)
    }

    fn mode_setting(
        &mut self,
        name: &str,
        validator: Validator,
        value: Option<Value>,
    ) -> AppResult<Value> {
        let token = self.mode_token()?;
        self.mode_setting_in(token, name, validator, value)
    }

    fn mode_setting_in(
        &mut self,
        token: &str,
        name: &str,
        validator: Validator,
        value: Option<Value>,
    ) -> AppResult<Value> {
        let (_, suffix, parser) = MODE_SETTINGS
            .into_iter()
            .find(|(setting, _, _)| *setting == name)
            .ok_or_else(|| DriverError::UnknownParameter(name.to_string()))?;
        let header = format!("{token}:{suffix}");
        debug!("[{}] {} resolved to {}", self.inner.name(), name, header);

        let spec = ParameterSpec::new(name)
            .get_cmd(format!("{header}?"))
            .set_cmd(format!("{header} {{value}}"))
            .validator(validator)
            .parser(parser);
        let value = self.inner.access_transient(spec, value)?;
        self.mode_cache.insert(header, value.clone());
        Ok(value)
    }

    fn input_impedance_spec(&mut self) -> AppResult<ParameterSpec> {
        let mode = self.mode()?;
        if mode != "dc voltage" {
            return Err(DriverError::validation(
                "input_impedance",
                format!("only available in dc voltage mode, not {mode}"),
            ));
        }
        Ok(ParameterSpec::new("input_impedance")
            .get_cmd(":VOLT:DC:INP?")
            .set_cmd(":VOLT:DC:INP {value}")
            .mapping(INPUT_IMPEDANCE))
    }
}

fn as_float(value: Value, command: &str) -> AppResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DriverError::malformed(command, value.to_string()))
}

fn as_bool(value: Value, command: &str) -> AppResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::malformed(command, value.to_string()))
}
