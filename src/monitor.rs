//! Interactive pass-through terminal for a serial port.
//!
//! Lines typed on stdin are sent with the chosen line ending; everything the
//! device sends back is printed line by line as it arrives.

use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Line ending appended to every typed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LineEnding {
    /// Send lines as typed.
    #[value(name = "none")]
    None,
    /// Line feed.
    #[default]
    #[value(name = "LF")]
    Lf,
    /// Carriage return.
    #[value(name = "CR")]
    Cr,
    /// Carriage return and line feed.
    #[value(name = "CRLF")]
    Crlf,
}

impl LineEnding {
    /// Characters appended to a line.
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::None => "",
            LineEnding::Lf => "\n",
            LineEnding::Cr => "\r",
            LineEnding::Crlf => "\r\n",
        }
    }

    /// `line` followed by this ending.
    pub fn apply(&self, line: &str) -> String {
        format!("{}{}", line, self.as_str())
    }
}

/// Command line of the `serial_monitor` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "serial_monitor")]
#[command(about = "Simple serial monitor: type lines to send, see everything the device prints")]
pub struct MonitorOptions {
    /// Serial port (e.g. COM3 or /dev/ttyUSB0)
    #[arg(long)]
    pub port: String,

    /// Baud rate
    #[arg(long, default_value_t = 9600)]
    pub baudrate: u32,

    /// Line ending appended to sent lines
    #[arg(long, value_enum, default_value_t = LineEnding::Lf)]
    pub eol: LineEnding,

    /// Read timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,
}

/// Read timeout used when none is given.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Time the board needs after the port opens.
pub const BOOT_DELAY: Duration = Duration::from_secs(3);

/// Pause after each sent line.
pub const SEND_PAUSE: Duration = Duration::from_millis(100);

impl MonitorOptions {
    /// Read timeout of the port.
    pub fn read_timeout(&self) -> Duration {
        self.timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_READ_TIMEOUT)
    }
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes; returns every line completed by them, without
    /// line endings.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.buffer);
                lines.push(line.trim_end_matches('\r').to_string());
                self.buffer.clear();
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(feature = "instrument_serial")]
pub use session::run;

#[cfg(feature = "instrument_serial")]
mod session {
    use super::{LineAssembler, MonitorOptions, BOOT_DELAY, SEND_PAUSE};
    use crate::transport::PortClaim;
    use anyhow::{Context, Result};
    use std::io::{ErrorKind, Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tracing::{debug, warn};

    /// Run the monitor until stdin closes.
    pub async fn run(options: MonitorOptions) -> Result<()> {
        let _claim = PortClaim::acquire(&options.port)?;
        let mut port = serialport::new(&options.port, options.baudrate)
            .timeout(options.read_timeout())
            .open()
            .with_context(|| format!("opening {}", options.port))?;

        println!("Connected to {} at {} baud.", options.port, options.baudrate);
        tokio::time::sleep(BOOT_DELAY).await;

        let mut reader = port.try_clone().context("cloning serial port handle")?;
        let running = Arc::new(AtomicBool::new(true));
        let reader_running = running.clone();

        let reader_task = tokio::task::spawn_blocking(move || {
            let mut assembler = LineAssembler::new();
            let mut buffer = [0u8; 256];
            while reader_running.load(Ordering::Relaxed) {
                match reader.read(&mut buffer) {
                    Ok(0) => continue,
                    Ok(n) => {
                        for line in assembler.push(&buffer[..n]) {
                            println!("{line}");
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!("Serial read failed: {}", e);
                        break;
                    }
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let framed = options.eol.apply(&line);
            port.write_all(framed.as_bytes())
                .with_context(|| format!("writing to {}", options.port))?;
            port.flush()?;
            debug!("Sent {:?}", framed);
            tokio::time::sleep(SEND_PAUSE).await;
        }

        running.store(false, Ordering::Relaxed);
        reader_task.await?;
        println!("Disconnected.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings() {
        assert_eq!(LineEnding::None.apply("*IDN?"), "*IDN?");
        assert_eq!(LineEnding::Lf.apply("*IDN?"), "*IDN?\n");
        assert_eq!(LineEnding::Cr.apply("*IDN?"), "*IDN?\r");
        assert_eq!(LineEnding::Crlf.apply("*IDN?"), "*IDN?\r\n");
    }

    #[test]
    fn test_cli_defaults() {
        let options = MonitorOptions::parse_from(["serial_monitor", "--port", "/dev/ttyACM0"]);
        assert_eq!(options.port, "/dev/ttyACM0");
        assert_eq!(options.baudrate, 9600);
        assert_eq!(options.eol, LineEnding::Lf);
        assert_eq!(options.read_timeout(), DEFAULT_READ_TIMEOUT);
    }

    #[test]
    fn test_cli_overrides() {
        let options = MonitorOptions::parse_from([
            "serial_monitor",
            "--port",
            "COM3",
            "--baudrate",
            "115200",
            "--eol",
            "CRLF",
            "--timeout",
            "0.5",
        ]);
        assert_eq!(options.baudrate, 115200);
        assert_eq!(options.eol, LineEnding::Crlf);
        assert_eq!(options.read_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_port_is_required() {
        assert!(MonitorOptions::try_parse_from(["serial_monitor"]).is_err());
    }

    #[test]
    fn test_line_assembler() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"8.84").is_empty());
        assert_eq!(assembler.push(b"3349\r\nBAR"), vec!["8.843349".to_string()]);
        assert_eq!(assembler.pending(), b"BAR");
        assert_eq!(assembler.push(b"RERA\n"), vec!["BARRERA".to_string()]);
    }
}
