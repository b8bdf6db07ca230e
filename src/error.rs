//! Custom error types for the drivers.
//!
//! `DriverError` is the single error type returned by every transport,
//! parameter and instrument operation. Callers that only care about the broad
//! failure class can use [`DriverError::is_validation`] and
//! [`DriverError::is_communication`]:
//!
//! - **Validation**: the requested value lies outside the parameter's declared
//!   bounds. Nothing was sent to the device.
//! - **Communication**: timeout, malformed reply, lost connection or an
//!   underlying I/O / serial port failure.
//!
//! The remaining variants describe driver misuse (unknown parameter names,
//! reading a set-only parameter that was never written, ...) or setup problems
//! (port already claimed, bad configuration).
//!
//! Nothing here is retried automatically. A failed operation leaves the
//! parameter cache at its previous value.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DriverError>;

/// Everything that can go wrong talking to an instrument.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Value outside the parameter's declared bounds; nothing was sent.
    #[error("Invalid value for '{parameter}': {reason}")]
    Validation {
        /// Parameter the value was meant for.
        parameter: String,
        /// What the bounds allow.
        reason: String,
    },

    /// No complete reply line before the timeout.
    #[error("Timed out after {timeout:?} waiting for a reply to '{command}'")]
    Timeout {
        /// Last command written.
        command: String,
        /// Timeout in effect.
        timeout: Duration,
    },

    /// The reply could not be parsed.
    #[error("Malformed reply to '{command}': {reply:?}")]
    MalformedReply {
        /// Command that was answered.
        command: String,
        /// The reply as received.
        reply: String,
    },

    /// I/O on a closed transport.
    #[error("Transport '{0}' is closed")]
    Disconnected(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the serial port driver.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Another transport in this process holds the port.
    #[error("Serial port '{0}' is already open")]
    PortInUse(String),

    /// No parameter with that name.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// No channel with that name or index.
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    /// Write to a read-only parameter.
    #[error("Parameter '{0}' is read-only")]
    NotSettable(String),

    /// Read of a set-only parameter that was never written.
    #[error("Parameter '{0}' has never been set")]
    Unset(String),

    /// The device answered `*LANG?` with another command set.
    #[error("Instrument speaks the '{found}' command set, expected '{expected}'")]
    CommandSet {
        /// Command set the driver speaks.
        expected: String,
        /// Command set the device reported.
        found: String,
    },

    /// A command template could not be rendered.
    #[error("Command template '{template}' failed: {reason}")]
    Template {
        /// The template.
        template: String,
        /// Why rendering failed.
        reason: String,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Shorthand for a [`DriverError::Validation`].
    pub fn validation(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`DriverError::MalformedReply`].
    pub fn malformed(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::MalformedReply {
            command: command.into(),
            reply: reply.into(),
        }
    }

    /// True when the caller supplied a value outside the declared bounds.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True for timeouts, malformed replies and lost connections.
    pub fn is_communication(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::MalformedReply { .. } | Self::Disconnected(_) => true,
            Self::Io(_) => true,
            #[cfg(feature = "instrument_serial")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

impl From<figment::Error> for DriverError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
