//! In-memory transport for tests and simulations.
//!
//! Every written line is handed to a responder closure. A `Some(reply)`
//! queues that reply for the next [`read_line`](Transport::read_line); `None`
//! means the device stays silent, and a read with nothing queued fails with a
//! timeout exactly like a real port would.

use super::Transport;
use crate::error::{AppResult, DriverError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Shared record of every line written to a [`MockTransport`].
///
/// Cloned out before the transport is moved into an instrument so tests can
/// inspect the traffic afterwards.
#[derive(Clone, Default, Debug)]
pub struct WriteLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl WriteLog {
    /// All lines written so far, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of lines written so far.
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent line, if any.
    pub fn last(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn push(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// Transport whose device is a closure.
pub struct MockTransport {
    name: String,
    responder: Responder,
    pending: VecDeque<String>,
    log: WriteLog,
    timeout: Duration,
    last_command: String,
    closed: bool,
}

impl MockTransport {
    /// Create a transport answering through `responder`.
    pub fn new(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> Self {
        Self {
            name: "mock".to_string(),
            responder: Box::new(responder),
            pending: VecDeque::new(),
            log: WriteLog::default(),
            timeout: Duration::from_secs(5),
            last_command: String::new(),
            closed: false,
        }
    }

    /// Transport that never answers.
    pub fn silent() -> Self {
        Self::new(|_| None)
    }

    /// Rename the transport (shown in log messages and errors).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Handle on the record of written lines.
    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

impl Transport for MockTransport {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        if self.closed {
            return Err(DriverError::Disconnected(self.name.clone()));
        }
        self.log.push(line);
        self.last_command = line.to_string();
        if let Some(reply) = (self.responder)(line) {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        if self.closed {
            return Err(DriverError::Disconnected(self.name.clone()));
        }
        self.pending.pop_front().ok_or_else(|| DriverError::Timeout {
            command: self.last_command.clone(),
            timeout: self.timeout,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> AppResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn clear_input(&mut self) -> AppResult<()> {
        if self.closed {
            return Err(DriverError::Disconnected(self.name.clone()));
        }
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_transport_times_out() {
        let mut transport = MockTransport::silent();
        transport.write_line("FREQ?").unwrap();
        let err = transport.read_line().unwrap_err();
        assert!(matches!(err, DriverError::Timeout { ref command, .. } if command == "FREQ?"));
    }

    #[test]
    fn test_replies_are_queued_in_order() {
        let mut transport = MockTransport::new(|line| Some(line.to_lowercase()));
        transport.write_line("A").unwrap();
        transport.write_line("B").unwrap();
        assert_eq!(transport.read_line().unwrap(), "a");
        assert_eq!(transport.read_line().unwrap(), "b");
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let mut transport = MockTransport::silent().with_name("dac");
        let log = transport.log();
        transport.close().unwrap();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.write_line("*RST"),
            Err(DriverError::Disconnected(name)) if name == "dac"
        ));
        assert!(log.is_empty());
    }
}
