//! Instrument parameters: declaration, validation, caching.
//!
//! A [`Parameter`] couples a declarative [`ParameterSpec`] with the last value
//! known to be on the device. A [`ParameterSpec`] says how to talk to the device:
//!
//! - [`GetCommand`]: query template, or `None` for set-only parameters whose
//!   reads return the cache
//! - [`SetCommand`]: write template, or `None` for read-only parameters
//! - [`Validator`]: declared bounds, checked before anything is written
//! - [`ReplyParser`]: how a reply line becomes a [`Value`]
//!
//! Command templates use named placeholders rendered with `strfmt`; the value
//! being written is available as `{value}`.
//!
//! # Cache semantics
//!
//! The cache changes only after a successful round trip. A rejected value, a
//! failed write or an unparseable reply leave it exactly as it was. A set-only
//! parameter that was never written has no cached value and reads back as
//! [`DriverError::Unset`]; no default is ever invented for it.
//!
//! # Example
//!
//! ```rust
//! use barrera_lab_drivers::parameter::{Parameter, ParameterSpec, Validator};
//! use barrera_lab_drivers::transport::sim;
//!
//! let mut voltage = Parameter::new(
//!     ParameterSpec::new("voltage")
//!         .unit("V")
//!         .get_cmd("channel1:VOLTAGE?")
//!         .set_cmd("channel1:VOLTAGE {value}")
//!         .validator(Validator::Numbers { min: -10.0, max: 10.0 })
//!         .confirm_set(),
//! );
//!
//! let mut dac = sim::dcdac5764();
//! let applied = voltage.set(&mut dac, 2.5).unwrap();
//! assert!((applied.as_f64().unwrap() - 2.5).abs() < 1e-3);
//! assert!(voltage.set(&mut dac, 12.0).unwrap_err().is_validation());
//! ```

use crate::error::{AppResult, DriverError};
use crate::transport::Transport;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

// =============================================================================
// Values
// =============================================================================

/// A parameter value as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Floating point quantity (voltages, frequencies, delays).
    Float(f64),
    /// Integer setting (offsets, step sizes, digit counts).
    Int(i64),
    /// On/off switch.
    Bool(bool),
    /// Free text or a label of a value mapping.
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(_) | Value::Text(_) => None,
        }
    }

    /// Integer view of the value, if it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Declared bounds of a settable parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    /// Anything goes; the value is sent as displayed.
    Any,
    /// Real number in `[min, max]`.
    Numbers {
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },
    /// Integer in `[min, max]`.
    Ints {
        /// Lower bound (inclusive).
        min: i64,
        /// Upper bound (inclusive).
        max: i64,
    },
    /// Boolean, sent as `1` / `0`.
    Bool,
    /// One of a fixed set of words, sent verbatim.
    Enum(Vec<String>),
    /// Human label mapped to the device token, e.g. `REMOTE` -> `5`.
    Mapping(Vec<(String, String)>),
    /// The first member validator that accepts the value wins.
    MultiType(Vec<Validator>),
}

impl Validator {
    /// Mapping validator from `(label, device token)` pairs.
    pub fn mapping<L, T>(pairs: impl IntoIterator<Item = (L, T)>) -> Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        Validator::Mapping(
            pairs
                .into_iter()
                .map(|(label, token)| (label.into(), token.into()))
                .collect(),
        )
    }

    /// Enum validator from a list of accepted words.
    pub fn one_of<S: Into<String>>(choices: impl IntoIterator<Item = S>) -> Self {
        Validator::Enum(choices.into_iter().map(Into::into).collect())
    }

    /// Check `value` against the bounds.
    ///
    /// Returns the normalized value (what the cache will hold) and the token
    /// substituted for `{value}` in the write template.
    pub fn check(&self, parameter: &str, value: &Value) -> AppResult<(Value, String)> {
        match self {
            Validator::Any => Ok((value.clone(), value.to_string())),

            Validator::Numbers { min, max } => {
                let v = value.as_f64().ok_or_else(|| {
                    DriverError::validation(parameter, format!("{value} is not a number"))
                })?;
                if !v.is_finite() || v < *min || v > *max {
                    return Err(DriverError::validation(
                        parameter,
                        format!("{v} is outside [{min}, {max}]"),
                    ));
                }
                Ok((Value::Float(v), v.to_string()))
            }

            Validator::Ints { min, max } => {
                let v = value.as_i64().ok_or_else(|| {
                    DriverError::validation(parameter, format!("{value} is not an integer"))
                })?;
                if v < *min || v > *max {
                    return Err(DriverError::validation(
                        parameter,
                        format!("{v} is outside [{min}, {max}]"),
                    ));
                }
                Ok((Value::Int(v), v.to_string()))
            }

            Validator::Bool => {
                let v = value.as_bool().ok_or_else(|| {
                    DriverError::validation(parameter, format!("{value} is not a boolean"))
                })?;
                Ok((Value::Bool(v), if v { "1" } else { "0" }.to_string()))
            }

            Validator::Enum(choices) => match value.as_str() {
                Some(word) if choices.iter().any(|c| c == word) => {
                    Ok((value.clone(), word.to_string()))
                }
                _ => Err(DriverError::validation(
                    parameter,
                    format!("{value} is not one of {choices:?}"),
                )),
            },

            Validator::Mapping(pairs) => {
                let label = value.to_string();
                pairs
                    .iter()
                    .find(|(l, _)| *l == label)
                    .map(|(l, token)| (Value::Text(l.clone()), token.clone()))
                    .ok_or_else(|| {
                        let labels: Vec<&str> = pairs.iter().map(|(l, _)| l.as_str()).collect();
                        DriverError::validation(
                            parameter,
                            format!("{label} is not one of {labels:?}"),
                        )
                    })
            }

            Validator::MultiType(members) => {
                let mut reasons = Vec::new();
                for member in members {
                    match member.check(parameter, value) {
                        Ok(accepted) => return Ok(accepted),
                        Err(DriverError::Validation { reason, .. }) => reasons.push(reason),
                        Err(other) => return Err(other),
                    }
                }
                Err(DriverError::validation(parameter, reasons.join("; ")))
            }
        }
    }
}

// =============================================================================
// Reply parsing
// =============================================================================

/// How a reply line is turned into a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyParser {
    /// Floating point number (scientific notation accepted).
    Float,
    /// Integer.
    Int,
    /// Floating point reply rounded to the nearest integer.
    RoundedInt,
    /// `0` / `1` (or `OFF` / `ON`).
    Bool,
    /// Raw text, surrounding whitespace removed.
    Text,
    /// Trimmed, unquoted, lowercase text; `mov` and `rep` are expanded to
    /// `moving` and `repeat`.
    CleanText,
    /// Inverse of a [`Validator::Mapping`]: device token back to its label.
    Mapping(Vec<(String, String)>),
}

impl ReplyParser {
    /// Parse `reply`, the answer to `command`.
    pub fn parse(&self, command: &str, reply: &str) -> AppResult<Value> {
        let trimmed = reply.trim();
        let malformed = || DriverError::malformed(command, reply);

        // `nan` and `inf` parse as f64 but are never a real reading
        let finite = || {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(malformed)
        };

        match self {
            ReplyParser::Float => finite().map(Value::Float),
            ReplyParser::Int => trimmed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| malformed()),
            ReplyParser::RoundedInt => {
                let v = finite()?.round();
                if v.abs() >= i64::MAX as f64 {
                    return Err(malformed());
                }
                Ok(Value::Int(v as i64))
            }
            ReplyParser::Bool => match trimmed.to_ascii_uppercase().as_str() {
                "1" | "ON" => Ok(Value::Bool(true)),
                "0" | "OFF" => Ok(Value::Bool(false)),
                _ => finite().map(|v| Value::Bool(v != 0.0)),
            },
            ReplyParser::Text => Ok(Value::Text(trimmed.to_string())),
            ReplyParser::CleanText => {
                if trimmed.is_empty() {
                    return Err(malformed());
                }
                Ok(Value::Text(clean_text(trimmed)))
            }
            ReplyParser::Mapping(pairs) => {
                let token = unquote(trimmed);
                pairs
                    .iter()
                    .find(|(_, t)| t.eq_ignore_ascii_case(token) || tokens_match(t, token))
                    .map(|(label, _)| Value::Text(label.clone()))
                    .ok_or_else(malformed)
            }
        }
    }
}

/// Trim, strip one level of matching quotes, lowercase and expand the
/// multimeter's `mov` / `rep` abbreviations.
pub fn clean_text(reply: &str) -> String {
    let s = unquote(reply.trim()).to_lowercase();
    match s.as_str() {
        "mov" => "moving".to_string(),
        "rep" => "repeat".to_string(),
        _ => s,
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Numeric tokens compare by value (`5` matches `5.0`).
fn tokens_match(expected: &str, received: &str) -> bool {
    match (expected.parse::<f64>(), received.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// =============================================================================
// Specs and commands
// =============================================================================

/// How to read a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum GetCommand {
    /// Set-only: reads return the cached value.
    None,
    /// Send this query and parse the reply.
    Query(String),
}

/// How to write a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SetCommand {
    /// Read-only.
    None,
    /// Render this template with `{value}` and send it.
    Write(String),
}

/// Declaration of one parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    /// Identifier used for lookup (e.g. `voltage`).
    pub name: String,
    /// Human readable label.
    pub label: String,
    /// Physical unit, empty when dimensionless.
    pub unit: String,
    /// Read command.
    pub get: GetCommand,
    /// Write command.
    pub set: SetCommand,
    /// Accepted values for writes.
    pub validator: Validator,
    /// Reply interpretation for reads.
    pub parser: ReplyParser,
    /// Read the value back after writing it and cache what the device reports.
    pub confirm_set: bool,
}

impl ParameterSpec {
    /// Neither gettable nor settable until commands are attached.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            unit: String::new(),
            get: GetCommand::None,
            set: SetCommand::None,
            validator: Validator::Any,
            parser: ReplyParser::Float,
            confirm_set: false,
        }
    }

    /// Set the label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the physical unit.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Attach a query command.
    pub fn get_cmd(mut self, query: impl Into<String>) -> Self {
        self.get = GetCommand::Query(query.into());
        self
    }

    /// Attach a write template (use `{value}` for the value).
    pub fn set_cmd(mut self, template: impl Into<String>) -> Self {
        self.set = SetCommand::Write(template.into());
        self
    }

    /// Set the write validator.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Set the reply parser.
    pub fn parser(mut self, parser: ReplyParser) -> Self {
        self.parser = parser;
        self
    }

    /// Use a label/token mapping for both directions.
    pub fn mapping<L, T>(mut self, pairs: impl IntoIterator<Item = (L, T)>) -> Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        let validator = Validator::mapping(pairs);
        if let Validator::Mapping(pairs) = &validator {
            self.parser = ReplyParser::Mapping(pairs.clone());
        }
        self.validator = validator;
        self
    }

    /// Read back after every write.
    pub fn confirm_set(mut self) -> Self {
        self.confirm_set = true;
        self
    }

    /// True if the device can be queried for this parameter.
    pub fn is_gettable(&self) -> bool {
        matches!(self.get, GetCommand::Query(_))
    }

    /// True if the parameter accepts writes.
    pub fn is_settable(&self) -> bool {
        matches!(self.set, SetCommand::Write(_))
    }
}

/// Substitute `{value}` in a write template.
pub fn render_command(template: &str, token: &str) -> AppResult<String> {
    let mut vars = HashMap::new();
    vars.insert("value".to_string(), token.to_string());
    strfmt::strfmt(template, &vars).map_err(|e| DriverError::Template {
        template: template.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Parameter
// =============================================================================

/// A declared parameter plus its cached value.
#[derive(Debug, Clone)]
pub struct Parameter {
    spec: ParameterSpec,
    cache: Option<Value>,
}

impl Parameter {
    /// New parameter with an empty cache.
    pub fn new(spec: ParameterSpec) -> Self {
        Self { spec, cache: None }
    }

    /// The declaration.
    pub fn spec(&self) -> &ParameterSpec {
        &self.spec
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Physical unit.
    pub fn unit(&self) -> &str {
        &self.spec.unit
    }

    /// Last value read from or written to the device.
    pub fn cached(&self) -> Option<&Value> {
        self.cache.as_ref()
    }

    /// Read the value.
    ///
    /// Queries the device when the parameter has a get command, otherwise
    /// returns the cached value of a set-only parameter.
    ///
    /// # Errors
    /// - [`DriverError::Unset`] for a set-only parameter never written
    /// - communication errors from the transport or reply parsing
    pub fn get(&mut self, transport: &mut dyn Transport) -> AppResult<Value> {
        let query = match &self.spec.get {
            GetCommand::Query(query) => query,
            GetCommand::None => {
                return self
                    .cache
                    .clone()
                    .ok_or_else(|| DriverError::Unset(self.spec.name.clone()));
            }
        };

        let reply = transport.query(query)?;
        let value = self.spec.parser.parse(query, &reply)?;
        self.cache = Some(value.clone());
        Ok(value)
    }

    /// Write a value.
    ///
    /// Validation happens before anything is sent. With `confirm_set` the
    /// value is read back and the device's answer is returned and cached;
    /// otherwise the normalized input is.
    ///
    /// # Errors
    /// - [`DriverError::NotSettable`] for read-only parameters
    /// - [`DriverError::Validation`] when the value is out of bounds
    /// - communication errors from the transport or the confirmation read
    pub fn set(
        &mut self,
        transport: &mut dyn Transport,
        value: impl Into<Value>,
    ) -> AppResult<Value> {
        let value = value.into();
        let template = match &self.spec.set {
            SetCommand::Write(template) => template,
            SetCommand::None => return Err(DriverError::NotSettable(self.spec.name.clone())),
        };

        let (normalized, token) = self.spec.validator.check(&self.spec.name, &value)?;
        let command = render_command(template, &token)?;
        transport.write_line(&command)?;
        debug!("Set '{}' to {}", self.spec.name, normalized);

        let confirmed = match (&self.spec.get, self.spec.confirm_set) {
            (GetCommand::Query(query), true) => {
                let reply = transport.query(query)?;
                self.spec.parser.parse(query, &reply)?
            }
            _ => normalized,
        };

        self.cache = Some(confirmed.clone());
        Ok(confirmed)
    }

    /// Get-or-set in one call: `None` reads, `Some(v)` writes `v`.
    pub fn access(
        &mut self,
        transport: &mut dyn Transport,
        value: Option<Value>,
    ) -> AppResult<Value> {
        match value {
            Some(v) => self.set(transport, v),
            None => self.get(transport),
        }
    }

    /// Forget the cached value.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

// =============================================================================
// ParameterSet
// =============================================================================

/// Ordered, name-addressed collection of parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
}

impl ParameterSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter declared by `spec`. A later spec with the same name
    /// replaces the earlier one.
    pub fn add(&mut self, spec: ParameterSpec) {
        match self.parameters.iter_mut().find(|p| p.name() == spec.name) {
            Some(existing) => *existing = Parameter::new(spec),
            None => self.parameters.push(Parameter::new(spec)),
        }
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Look up by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> AppResult<&mut Parameter> {
        self.parameters
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| DriverError::UnknownParameter(name.to_string()))
    }

    /// Parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    /// Parameters in declaration order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.parameters.iter_mut()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// True when no parameter is declared.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl FromIterator<ParameterSpec> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = ParameterSpec>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for spec in iter {
            set.add(spec);
        }
        set
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Where a parameter lives on an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamAddress {
    /// Instrument-level parameter.
    Instrument(String),
    /// Parameter of the channel at `index` (0-based).
    Channel {
        /// 0-based channel index.
        index: usize,
        /// Parameter name.
        name: String,
    },
}

impl ParamAddress {
    /// Address of an instrument-level parameter.
    pub fn instrument(name: impl Into<String>) -> Self {
        ParamAddress::Instrument(name.into())
    }

    /// Address of a channel parameter.
    pub fn channel(index: usize, name: impl Into<String>) -> Self {
        ParamAddress::Channel {
            index,
            name: name.into(),
        }
    }

    /// Parameter name without its location.
    pub fn name(&self) -> &str {
        match self {
            ParamAddress::Instrument(name) | ParamAddress::Channel { name, .. } => name,
        }
    }
}

impl fmt::Display for ParamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamAddress::Instrument(name) => write!(f, "{name}"),
            ParamAddress::Channel { index, name } => write!(f, "channel[{index}].{name}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn voltage_spec() -> ParameterSpec {
        ParameterSpec::new("voltage")
            .unit("V")
            .get_cmd("channel1:VOLTAGE?")
            .set_cmd("channel1:VOLTAGE {value}")
            .validator(Validator::Numbers {
                min: -10.0,
                max: 10.0,
            })
    }

    #[test]
    fn test_get_updates_cache() {
        let mut transport = MockTransport::new(|_| Some("1.25".into()));
        let mut param = Parameter::new(voltage_spec());
        assert!(param.cached().is_none());

        let value = param.get(&mut transport).unwrap();
        assert_eq!(value, Value::Float(1.25));
        assert_eq!(param.cached(), Some(&Value::Float(1.25)));
    }

    #[test]
    fn test_set_renders_template() {
        let mut transport = MockTransport::silent();
        let log = transport.log();
        let mut param = Parameter::new(voltage_spec());

        let value = param.set(&mut transport, 8.84).unwrap();
        assert_eq!(value, Value::Float(8.84));
        assert_eq!(log.lines(), vec!["channel1:VOLTAGE 8.84".to_string()]);
        assert_eq!(param.cached(), Some(&Value::Float(8.84)));
    }

    #[test]
    fn test_out_of_range_never_writes() {
        let mut transport = MockTransport::silent();
        let log = transport.log();
        let mut param = Parameter::new(voltage_spec());

        let err = param.set(&mut transport, 10.1).unwrap_err();
        assert!(err.is_validation());
        let err = param.set(&mut transport, -10.1).unwrap_err();
        assert!(err.is_validation());
        assert!(log.is_empty());
        assert!(param.cached().is_none());
    }

    #[test]
    fn test_confirmed_set_caches_device_value() {
        let mut transport = MockTransport::new(|line| {
            (line == "channel1:VOLTAGE?").then(|| "8.843349".to_string())
        });
        let mut param = Parameter::new(voltage_spec().confirm_set());

        let value = param.set(&mut transport, 8.84).unwrap();
        assert_eq!(value, Value::Float(8.843349));
        assert_eq!(param.cached(), Some(&Value::Float(8.843349)));
    }

    #[test]
    fn test_failed_confirmation_keeps_cache() {
        let mut transport = MockTransport::new(|line| {
            (line == "channel1:VOLTAGE?").then(|| "1.0".to_string())
        });
        let mut param = Parameter::new(voltage_spec().confirm_set());
        param.get(&mut transport).unwrap();

        let mut broken = MockTransport::new(|line| {
            (line == "channel1:VOLTAGE?").then(|| "ERR".to_string())
        });
        let err = param.set(&mut broken, 2.0).unwrap_err();
        assert!(err.is_communication());
        assert_eq!(param.cached(), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_timeout_keeps_cache() {
        let mut transport = MockTransport::new(|_| Some("3.5".into()));
        let mut param = Parameter::new(voltage_spec());
        param.get(&mut transport).unwrap();

        let mut silent = MockTransport::silent();
        let err = param.get(&mut silent).unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert_eq!(param.cached(), Some(&Value::Float(3.5)));
    }

    #[test]
    fn test_late_reply_is_not_cached_by_next_get() {
        let mut transport = MockTransport::new(|line| match line {
            "channel1:VOLTAGE?" => Some("1.000000".to_string()),
            "channel2:VOLTAGE?" => Some("-4.000000".to_string()),
            _ => None,
        });
        // channel1's answer arrives but its read already gave up
        transport.write_line("channel1:VOLTAGE?").unwrap();

        let mut channel2 = Parameter::new(
            ParameterSpec::new("voltage")
                .get_cmd("channel2:VOLTAGE?")
                .validator(Validator::Numbers {
                    min: -10.0,
                    max: 10.0,
                }),
        );
        assert_eq!(channel2.get(&mut transport).unwrap(), Value::Float(-4.0));
        assert_eq!(channel2.cached(), Some(&Value::Float(-4.0)));
    }

    #[test]
    fn test_set_only_parameter_reads_cache() {
        let mut transport = MockTransport::silent();
        let log = transport.log();
        let mut offset = Parameter::new(
            ParameterSpec::new("offset")
                .set_cmd("channel1:OFFSET {value}")
                .validator(Validator::Ints { min: -128, max: 127 }),
        );

        assert!(matches!(
            offset.get(&mut transport),
            Err(DriverError::Unset(name)) if name == "offset"
        ));
        assert!(log.is_empty());

        offset.set(&mut transport, 12).unwrap();
        assert_eq!(offset.get(&mut transport).unwrap(), Value::Int(12));
        assert_eq!(log.lines(), vec!["channel1:OFFSET 12".to_string()]);
    }

    #[test]
    fn test_ints_accept_integral_floats_only() {
        let v = Validator::Ints { min: -32, max: 31 };
        assert_eq!(v.check("step", &Value::Float(3.0)).unwrap().1, "3");
        assert!(v.check("step", &Value::Float(3.5)).is_err());
        assert!(v.check("step", &Value::Int(32)).is_err());
    }

    #[test]
    fn test_read_only_rejects_set() {
        let mut transport = MockTransport::silent();
        let mut error = Parameter::new(
            ParameterSpec::new("error")
                .get_cmd("SYS:ERR?")
                .parser(ReplyParser::Text),
        );
        assert!(matches!(
            error.set(&mut transport, "x"),
            Err(DriverError::NotSettable(_))
        ));
    }

    #[test]
    fn test_mapping_both_directions() {
        let spec = ParameterSpec::new("display_mode")
            .get_cmd("SYS:DISP:MODE?")
            .set_cmd("SYS:DISP:MODE {value}")
            .mapping([("NORMAL", "0"), ("REMOTE", "5")]);
        let mut transport = MockTransport::new(|line| {
            (line == "SYS:DISP:MODE?").then(|| "5".to_string())
        });
        let log = transport.log();
        let mut param = Parameter::new(spec);

        param.set(&mut transport, "REMOTE").unwrap();
        assert_eq!(log.lines(), vec!["SYS:DISP:MODE 5".to_string()]);
        assert_eq!(param.get(&mut transport).unwrap(), Value::Text("REMOTE".into()));
        assert!(param.set(&mut transport, "FOCUS9").unwrap_err().is_validation());
    }

    #[test]
    fn test_multitype_validator() {
        let v = Validator::MultiType(vec![
            Validator::Ints { min: 1, max: 9999 },
            Validator::one_of(["inf", "default"]),
        ]);
        assert_eq!(v.check("trigger_count", &Value::Int(10)).unwrap().1, "10");
        assert_eq!(v.check("trigger_count", &"inf".into()).unwrap().1, "inf");
        assert!(v.check("trigger_count", &Value::Int(0)).is_err());
    }

    #[test]
    fn test_numeric_parsers() {
        assert_eq!(ReplyParser::Int.parse("DIG?", " 6\n").unwrap(), Value::Int(6));
        assert!(ReplyParser::Int.parse("DIG?", "6.5").is_err());
        assert_eq!(
            ReplyParser::RoundedInt.parse("COUN?", "1.000000E+01").unwrap(),
            Value::Int(10)
        );
        assert_eq!(
            ReplyParser::Float.parse("READ?", "-1.234567E-03").unwrap(),
            Value::Float(-1.234567e-3)
        );
    }

    #[test]
    fn test_non_finite_replies_are_malformed() {
        for reply in ["nan", "NaN", "inf", "-inf", "infinity"] {
            for parser in [ReplyParser::Float, ReplyParser::RoundedInt, ReplyParser::Bool] {
                let err = parser.parse("READ?", reply).unwrap_err();
                assert!(err.is_communication(), "{parser:?} accepted {reply}");
            }
        }
        assert!(ReplyParser::RoundedInt.parse("COUN?", "1e300").is_err());
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(" \"MOV\"\n"), "moving");
        assert_eq!(clean_text("'rep'"), "repeat");
        assert_eq!(clean_text("VOLT:DC"), "volt:dc");
    }

    #[test]
    fn test_access_is_get_or_set() {
        let mut transport = MockTransport::new(|line| {
            line.ends_with('?').then(|| "0.5".to_string())
        });
        let mut param = Parameter::new(voltage_spec());
        assert_eq!(param.access(&mut transport, None).unwrap(), Value::Float(0.5));
        assert_eq!(
            param.access(&mut transport, Some(Value::Float(-2.0))).unwrap(),
            Value::Float(-2.0)
        );
    }

    #[test]
    fn test_render_command_rejects_unknown_placeholder() {
        assert_eq!(
            render_command("FREQ {value};PAT:UPDATE", "24000").unwrap(),
            "FREQ 24000;PAT:UPDATE"
        );
        assert!(render_command("FREQ {frequency}", "1").is_err());
    }
}
