//! Process-wide record of open serial ports.
//!
//! A physical port may back at most one open transport. Opening a transport
//! takes a [`PortClaim`]; the claim is released when dropped, so the port
//! becomes available again as soon as its transport is closed or dropped.

use crate::error::{AppResult, DriverError};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

static OPEN_PORTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// RAII ownership of a port name.
#[derive(Debug)]
pub struct PortClaim {
    port: String,
}

impl PortClaim {
    /// Claim `port` for exclusive use.
    ///
    /// # Errors
    /// [`DriverError::PortInUse`] if another live claim holds the same name.
    pub fn acquire(port: &str) -> AppResult<Self> {
        let mut ports = OPEN_PORTS.lock().unwrap_or_else(|e| e.into_inner());
        if !ports.insert(port.to_string()) {
            return Err(DriverError::PortInUse(port.to_string()));
        }
        debug!("Claimed serial port '{}'", port);
        Ok(Self {
            port: port.to_string(),
        })
    }

    /// Name of the claimed port.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether any live claim currently holds `port`.
    pub fn is_claimed(port: &str) -> bool {
        OPEN_PORTS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(port)
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        let mut ports = OPEN_PORTS.lock().unwrap_or_else(|e| e.into_inner());
        ports.remove(&self.port);
        debug!("Released serial port '{}'", self.port);
    }
}
