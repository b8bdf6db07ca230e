//! Blocking serial port transport built on the `serialport` crate.

use super::{registry::PortClaim, trim_line_end, Transport, DEFAULT_TERMINATOR};
use crate::error::{AppResult, DriverError};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Poll interval of the underlying port; the overall reply timeout is
/// enforced on top of it.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Settings for opening a [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate (e.g., 9600, 115200)
    pub baud_rate: u32,
    /// Reply timeout
    pub timeout: Duration,
    /// Line terminator for commands and replies
    pub terminator: String,
}

impl SerialConfig {
    /// Settings with a 5 s timeout and `\n` terminator.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout: Duration::from_secs(5),
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the line terminator.
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }
}

/// Serial connection to one instrument.
///
/// Holds a [`PortClaim`] for as long as the port is open, so a second
/// transport on the same port fails with [`DriverError::PortInUse`].
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    claim: Option<PortClaim>,
    last_command: String,
}

impl SerialTransport {
    /// Claim and open the port described by `config`.
    pub fn open(config: SerialConfig) -> AppResult<Self> {
        if config.terminator.is_empty() {
            return Err(DriverError::Config(format!(
                "empty line terminator for port '{}'",
                config.port
            )));
        }

        let claim = PortClaim::acquire(&config.port)?;
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()?;

        info!(
            "Serial port '{}' opened at {} baud",
            config.port, config.baud_rate
        );

        Ok(Self {
            config,
            port: Some(port),
            claim: Some(claim),
            last_command: String::new(),
        })
    }

    /// Settings this transport was opened with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        let name = self.config.port.clone();
        self.port.as_mut().ok_or(DriverError::Disconnected(name))
    }
}

impl Transport for SerialTransport {
    fn describe(&self) -> String {
        self.config.port.clone()
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        let payload = format!("{}{}", line, self.config.terminator);
        let port = self.port_mut()?;
        port.write_all(payload.as_bytes())?;
        port.flush()?;
        debug!("Sent serial command: {}", line);
        self.last_command = line.to_string();
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        let timeout = self.config.timeout;
        let delimiter = self.config.terminator.as_bytes()[self.config.terminator.len() - 1];
        let port_name = self.config.port.clone();
        let command = self.last_command.clone();
        let port = self.port_mut()?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 1];
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(DriverError::Timeout { command, timeout });
            }

            match port.read(&mut buffer) {
                Ok(1) => {
                    response.push(buffer[0]);
                    if buffer[0] == delimiter {
                        break;
                    }
                }
                Ok(_) => {
                    return Err(DriverError::Disconnected(port_name));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let text = String::from_utf8_lossy(&response);
        let line = trim_line_end(&text).to_string();
        debug!("Received serial response: {}", line);
        Ok(line)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> AppResult<()> {
        self.config.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            info!("Serial port '{}' closed", self.config.port);
        }
        self.claim = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.port.is_none()
    }

    fn clear_input(&mut self) -> AppResult<()> {
        let port = self.port_mut()?;
        let stale = port.bytes_to_read()?;
        if stale > 0 {
            debug!("Discarding {} unread bytes", stale);
        }
        port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0", 9600);
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.terminator, "\n");
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("COM3", 115200)
            .with_timeout(Duration::from_millis(500))
            .with_terminator("\r\n");
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.terminator, "\r\n");
    }

    #[test]
    fn test_empty_terminator_rejected() {
        let config = SerialConfig::new("/dev/ttyNONEXISTENT", 9600).with_terminator("");
        assert!(matches!(
            SerialTransport::open(config),
            Err(DriverError::Config(_))
        ));
    }
}
