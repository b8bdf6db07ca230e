//! Smooth parameter sweeps.
//!
//! Outputs wired to a sample should not jump. A [`Ramp`] moves one or more
//! numeric parameters from their current value to a target in `steps`
//! linearly spaced points, pausing between points. Every point is written
//! through the normal set path, so bounds are enforced at each step.
//!
//! ```rust
//! use barrera_lab_drivers::drivers::DcDac5764;
//! use barrera_lab_drivers::parameter::ParamAddress;
//! use barrera_lab_drivers::ramp::Ramp;
//! use std::time::Duration;
//!
//! let mut dac = DcDac5764::simulated("dac").unwrap();
//! let ramp = Ramp::new(10).step_delay(Duration::ZERO);
//! ramp.run(
//!     dac.instrument_mut(),
//!     &[(ParamAddress::channel(0, "voltage"), 1.0)],
//! )
//! .unwrap();
//! ```

use crate::error::{AppResult, DriverError};
use crate::instrument::Instrument;
use crate::parameter::{ParamAddress, Value};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Default number of points per ramp.
pub const DEFAULT_STEPS: usize = 40;

/// Default pause between points.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(50);

/// How several parameters move relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RampMode {
    /// All parameters advance one point per step.
    #[default]
    Together,
    /// Each parameter completes its ramp before the next one starts.
    Sequential,
}

/// `steps` evenly spaced values from `start` to `end`, both included.
///
/// A single step yields just `end`.
pub fn linspace(start: f64, end: f64, steps: usize) -> AppResult<Vec<f64>> {
    match steps {
        0 => Err(DriverError::validation("steps", "a ramp needs at least one step")),
        1 => Ok(vec![end]),
        _ => {
            let last = (steps - 1) as f64;
            Ok((0..steps)
                .map(|i| {
                    if i == steps - 1 {
                        end
                    } else {
                        start + (end - start) * (i as f64) / last
                    }
                })
                .collect())
        }
    }
}

/// Ramp settings.
#[derive(Debug, Clone)]
pub struct Ramp {
    steps: usize,
    step_delay: Duration,
    mode: RampMode,
}

impl Default for Ramp {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            step_delay: DEFAULT_STEP_DELAY,
            mode: RampMode::Together,
        }
    }
}

impl Ramp {
    /// Ramp in `steps` points with the default delay and mode.
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Pause between points.
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// How several parameters move together.
    pub fn mode(mut self, mode: RampMode) -> Self {
        self.mode = mode;
        self
    }

    /// Move each addressed parameter to its target.
    ///
    /// Targets are checked against the parameters' bounds before anything is
    /// written. Returns the values reported by the last write of each
    /// parameter, in the order given.
    pub fn run(
        &self,
        instrument: &mut Instrument,
        targets: &[(ParamAddress, f64)],
    ) -> AppResult<Vec<Value>> {
        for (address, target) in targets {
            let spec = instrument.parameter_at(address)?.spec();
            spec.validator.check(&spec.name, &Value::Float(*target))?;
        }

        let mut paths = Vec::with_capacity(targets.len());
        for (address, target) in targets {
            let start = instrument.get_at(address)?.as_f64().ok_or_else(|| {
                DriverError::validation(address.to_string(), "only numeric values can be ramped")
            })?;
            paths.push(linspace(start, *target, self.steps)?);
        }

        info!(
            "[{}] Ramping {} parameter(s) in {} steps ({:?})",
            instrument.name(),
            targets.len(),
            self.steps,
            self.mode
        );

        let mut last = vec![Value::Float(0.0); targets.len()];
        match self.mode {
            RampMode::Together => {
                for step in 0..self.steps {
                    for (i, (address, _)) in targets.iter().enumerate() {
                        last[i] = instrument.set_at(address, paths[i][step])?;
                    }
                    debug!("Ramp step {}/{}", step + 1, self.steps);
                    self.pause(step);
                }
            }
            RampMode::Sequential => {
                for (i, (address, _)) in targets.iter().enumerate() {
                    for (step, point) in paths[i].iter().enumerate() {
                        last[i] = instrument.set_at(address, *point)?;
                        self.pause(step);
                    }
                    debug!("Ramp of {} complete", address);
                }
            }
        }
        Ok(last)
    }

    /// Ramp every addressed parameter to zero.
    pub fn to_zero(
        &self,
        instrument: &mut Instrument,
        addresses: &[ParamAddress],
    ) -> AppResult<Vec<Value>> {
        let targets: Vec<(ParamAddress, f64)> =
            addresses.iter().map(|a| (a.clone(), 0.0)).collect();
        self.run(instrument, &targets)
    }

    fn pause(&self, step: usize) {
        if step + 1 < self.steps && !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DcDac5764;
    use crate::transport::sim;

    #[test]
    fn test_linspace_includes_both_ends() {
        let points = linspace(0.0, 1.0, 5).unwrap();
        assert_eq!(points, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, -2.0, 1).unwrap(), vec![-2.0]);
        assert!(linspace(0.0, 1.0, 0).unwrap_err().is_validation());
    }

    #[test]
    fn test_together_interleaves_writes() {
        let transport = sim::dcdac5764();
        let log = transport.log();
        let mut dac = DcDac5764::connect(
            transport,
            &crate::drivers::ConnectOptions::new("dac").boot_delay(Duration::ZERO),
        )
        .unwrap();
        log.clear();

        let ramp = Ramp::new(3).step_delay(Duration::ZERO);
        ramp.run(
            dac.instrument_mut(),
            &[
                (ParamAddress::channel(0, "voltage"), 2.0),
                (ParamAddress::channel(1, "voltage"), -2.0),
            ],
        )
        .unwrap();

        let writes: Vec<String> = log
            .lines()
            .into_iter()
            .filter(|l| !l.ends_with('?'))
            .collect();
        assert_eq!(
            writes,
            vec![
                "channel1:VOLTAGE 0",
                "channel2:VOLTAGE 0",
                "channel1:VOLTAGE 1",
                "channel2:VOLTAGE -1",
                "channel1:VOLTAGE 2",
                "channel2:VOLTAGE -2",
            ]
        );
    }

    #[test]
    fn test_sequential_finishes_one_parameter_first() {
        let transport = sim::dcdac5764();
        let log = transport.log();
        let mut dac = DcDac5764::connect(
            transport,
            &crate::drivers::ConnectOptions::new("dac").boot_delay(Duration::ZERO),
        )
        .unwrap();
        log.clear();

        Ramp::new(2)
            .step_delay(Duration::ZERO)
            .mode(RampMode::Sequential)
            .run(
                dac.instrument_mut(),
                &[
                    (ParamAddress::channel(0, "voltage"), 4.0),
                    (ParamAddress::channel(1, "voltage"), 6.0),
                ],
            )
            .unwrap();

        let writes: Vec<String> = log
            .lines()
            .into_iter()
            .filter(|l| !l.ends_with('?'))
            .collect();
        assert_eq!(
            writes,
            vec![
                "channel1:VOLTAGE 0",
                "channel1:VOLTAGE 4",
                "channel2:VOLTAGE 0",
                "channel2:VOLTAGE 6",
            ]
        );
    }

    #[test]
    fn test_out_of_range_target_writes_nothing() {
        let transport = sim::dcdac5764();
        let log = transport.log();
        let mut dac = DcDac5764::connect(
            transport,
            &crate::drivers::ConnectOptions::new("dac").boot_delay(Duration::ZERO),
        )
        .unwrap();
        log.clear();

        let err = Ramp::default()
            .run(dac.instrument_mut(), &[(ParamAddress::channel(0, "voltage"), 11.0)])
            .unwrap_err();
        assert!(err.is_validation());
        assert!(log.is_empty());
    }

    #[test]
    fn test_to_zero() {
        let mut dac = DcDac5764::simulated("dac").unwrap();
        dac.set_voltage("channel3", 3.0).unwrap();
        let last = Ramp::new(4)
            .step_delay(Duration::ZERO)
            .to_zero(dac.instrument_mut(), &[ParamAddress::channel(2, "voltage")])
            .unwrap();
        let volts = last[0].as_f64().unwrap();
        assert!(volts.abs() <= sim::DC_LSB);
    }
}
