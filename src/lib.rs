//! Serial drivers for the Barrera lab instruments.
//!
//! This library contains the transports, the parameter model and the drivers
//! for the DC DAC (AD5764) and AC DAC (AD9106) boxes and the Keithley DMM6500
//! multimeter. It is used by the `serial_monitor` and `lab_snapshot`
//! binaries.
//!
//! Everything is blocking: each call returns once the device answered or the
//! reply timeout elapsed.
//!
//! ```rust
//! use barrera_lab_drivers::drivers::DcDac5764;
//!
//! let mut dac = DcDac5764::simulated("dac").unwrap();
//! let volts = dac.set_voltage("channel1", 8.84).unwrap();
//! assert!((volts - 8.84).abs() < 1e-3);
//! println!("{}", dac.snapshot(false));
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod monitor;
pub mod parameter;
pub mod ramp;
pub mod snapshot;
pub mod transport;

pub use error::{AppResult, DriverError};
pub use instrument::{Instrument, InstrumentBuilder};
pub use parameter::{ParamAddress, Value};
