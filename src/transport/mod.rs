//! Line-oriented transports.
//!
//! Every driver talks to its device through the [`Transport`] trait: write one
//! command line, read one reply line, with a timeout. Implementations:
//!
//! - [`SerialTransport`]: a real serial port (`instrument_serial` feature)
//! - [`MockTransport`]: in-memory, replies produced by a closure
//! - [`sim`]: simulated Barrera DAC boxes built on [`MockTransport`]
//!
//! Transports are blocking: a call returns once the device answered or the
//! timeout elapsed.

pub mod mock;
pub mod registry;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod sim;

use crate::error::AppResult;
use std::time::Duration;
use tracing::debug;

pub use mock::{MockTransport, WriteLog};
pub use registry::PortClaim;
#[cfg(feature = "instrument_serial")]
pub use serial::{SerialConfig, SerialTransport};

/// Synchronous, line-oriented connection to one instrument.
pub trait Transport: Send {
    /// Short description used in log messages (usually the port name).
    fn describe(&self) -> String;

    /// Send one command. The implementation appends the line terminator.
    fn write_line(&mut self, line: &str) -> AppResult<()>;

    /// Block until one full reply line arrived, returned without terminator.
    fn read_line(&mut self) -> AppResult<String>;

    /// Current read timeout.
    fn timeout(&self) -> Duration;

    /// Change the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> AppResult<()>;

    /// Release the underlying resource. Further I/O fails with
    /// [`DriverError::Disconnected`](crate::error::DriverError::Disconnected).
    fn close(&mut self) -> AppResult<()>;

    /// Whether [`close`](Transport::close) has been called.
    fn is_closed(&self) -> bool;

    /// Drop any received input nobody has read yet, e.g. a reply that
    /// arrived after its read timed out.
    fn clear_input(&mut self) -> AppResult<()>;

    /// Write a command and read its reply.
    ///
    /// Pending input is discarded first so the reply read is the answer to
    /// `line`.
    fn query(&mut self, line: &str) -> AppResult<String> {
        self.clear_input()?;
        self.write_line(line)?;
        let reply = self.read_line()?;
        debug!("[{}] {} -> {}", self.describe(), line, reply);
        Ok(reply)
    }
}

/// Line ending appended to outgoing commands.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Strip trailing CR/LF characters from a received line.
pub(crate) fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end("8.843349\r\n"), "8.843349");
        assert_eq!(trim_line_end("SCPI\n"), "SCPI");
        assert_eq!(trim_line_end(" padded \n"), " padded ");
    }

    #[test]
    fn test_query_writes_then_reads() {
        let mut transport = MockTransport::new(|line| Some(format!("echo {line}")));
        let log = transport.log();

        let reply = transport.query("*IDN?").unwrap();
        assert_eq!(reply, "echo *IDN?");
        assert_eq!(log.lines(), vec!["*IDN?".to_string()]);
    }

    #[test]
    fn test_query_skips_late_reply() {
        // The first reply is never read, as after a timed out read.
        let mut transport = MockTransport::new(|line| match line {
            "channel1:VOLTAGE?" => Some("1.000000".to_string()),
            "channel2:VOLTAGE?" => Some("-2.500000".to_string()),
            _ => None,
        });
        transport.write_line("channel1:VOLTAGE?").unwrap();

        let reply = transport.query("channel2:VOLTAGE?").unwrap();
        assert_eq!(reply, "-2.500000");
        assert!(transport.read_line().is_err());
    }
}
