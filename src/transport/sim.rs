//! Simulated Barrera DAC boxes.
//!
//! The simulations speak the same ASCII command sets as the Arduino firmware
//! of the real boxes and keep their output state in memory, so the drivers
//! can be exercised end to end without hardware.

use super::MockTransport;

/// Identification string of the simulated DC DAC.
pub const DCDAC_IDN: &str = "BARRERA,DCDAC (Simulated),1337,0.0.01";
/// Identification string of the simulated AC DAC.
pub const ACDAC_IDN: &str = "BARRERA,ACDAC (Simulated),1337,0.0.01";

/// Full scale of the AD5764 outputs, volts.
pub const DC_FULL_SCALE: f64 = 10.0;
/// Voltage resolution of the 16 bit AD5764 over ±10 V.
pub const DC_LSB: f64 = 2.0 * DC_FULL_SCALE / 65535.0;

/// Full scale of the AD9106 amplitude, millivolts.
pub const AC_FULL_SCALE_MV: f64 = 450.0;
/// Amplitude resolution of the 12 bit AD9106 over its full scale.
pub const AC_LSB_MV: f64 = AC_FULL_SCALE_MV / 4095.0;

/// Round `volts` to the nearest code the DC DAC can output.
pub fn quantize_dc(volts: f64) -> f64 {
    let clamped = volts.clamp(-DC_FULL_SCALE, DC_FULL_SCALE);
    let code = ((clamped + DC_FULL_SCALE) / DC_LSB).round();
    code * DC_LSB - DC_FULL_SCALE
}

/// Round `millivolts` to the nearest AC DAC amplitude code.
pub fn quantize_ac(millivolts: f64) -> f64 {
    let clamped = millivolts.clamp(0.0, AC_FULL_SCALE_MV);
    (clamped / AC_LSB_MV).round() * AC_LSB_MV
}

#[derive(Debug, Clone, Copy, Default)]
struct DcChannelState {
    voltage: f64,
    offset: i64,
    step: i64,
}

/// A DC DAC AD5764 with 8 channels (`channel1` .. `channel8`).
pub fn dcdac5764() -> MockTransport {
    let mut channels = [DcChannelState::default(); 8];

    MockTransport::new(move |line| {
        let line = line.trim();
        if line == "*IDN?" {
            return Some(DCDAC_IDN.to_string());
        }
        if line == "*RST" {
            channels = [DcChannelState::default(); 8];
            return None;
        }

        let (head, arg) = split_argument(line);
        let (target, command) = head.split_once(':')?;
        let index = target.strip_prefix("channel")?.parse::<usize>().ok()?;
        let state = channels.get_mut(index.checked_sub(1)?)?;

        match (command, arg) {
            ("VOLTAGE?", None) => Some(format!("{:.6}", state.voltage)),
            ("VOLTAGE", Some(value)) => {
                state.voltage = quantize_dc(value.parse().ok()?);
                None
            }
            ("OFFSET", Some(value)) => {
                state.offset = value.parse().ok()?;
                None
            }
            ("STEP", Some(value)) => {
                state.step = value.parse().ok()?;
                None
            }
            _ => None,
        }
    })
    .with_name("sim-dcdac5764")
}

#[derive(Debug, Clone, Copy, Default)]
struct AcChannelState {
    voltage_mv: f64,
    phase_deg: f64,
}

#[derive(Debug, Clone, Default)]
struct AcState {
    channels: [AcChannelState; 4],
    frequency_hz: f64,
    display_mode: u8,
    errors: Vec<String>,
}

impl AcState {
    fn handle(&mut self, command: &str) -> Option<String> {
        match command {
            "*IDN?" => return Some(ACDAC_IDN.to_string()),
            "*RST" => {
                *self = AcState::default();
                return None;
            }
            "PAT:UPDATE" => return None,
            "SYS:ERR?" => {
                let reply = if self.errors.is_empty() {
                    "0,\"No error\"".to_string()
                } else {
                    self.errors.remove(0)
                };
                return Some(reply);
            }
            "FREQ?" => return Some(self.frequency_hz.to_string()),
            _ => {}
        }

        let (head, arg) = split_argument(command);
        match (head, arg) {
            ("FREQ", Some(value)) => {
                self.frequency_hz = self.parse_or_log(value)?;
                return None;
            }
            ("SYS:DISP:MODE", Some(value)) => {
                self.display_mode = self.parse_or_log(value)?;
                return None;
            }
            _ => {}
        }

        let (target, property) = head.split_once(':')?;
        let index = target.strip_prefix("CHAN")?.parse::<usize>().ok()?;
        let channel = self.channels.get_mut(index.checked_sub(1)?)?;

        match (property, arg) {
            ("VOLTAGE?", None) => Some(channel.voltage_mv.to_string()),
            ("PHASE?", None) => Some(channel.phase_deg.to_string()),
            ("VOLTAGE", Some(value)) => {
                let parsed: f64 = value.parse().ok()?;
                channel.voltage_mv = quantize_ac(parsed);
                None
            }
            ("PHASE", Some(value)) => {
                channel.phase_deg = value.parse().ok()?;
                None
            }
            _ => None,
        }
    }

    fn parse_or_log<T: std::str::FromStr>(&mut self, value: &str) -> Option<T> {
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.errors
                    .push(format!("-224,\"Illegal parameter value {value}\""));
                None
            }
        }
    }
}

/// An AC DAC AD9106 with 4 channels (`CHAN1` .. `CHAN4`).
///
/// Commands may be chained with `;`, as in `CHAN1:VOLTAGE 400;PAT:UPDATE`.
pub fn acdac9106() -> MockTransport {
    let mut state = AcState::default();

    MockTransport::new(move |line| {
        let mut reply = None;
        for command in line.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            if let Some(answer) = state.handle(command) {
                reply = Some(answer);
            }
        }
        reply
    })
    .with_name("sim-acdac9106")
}

fn split_argument(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((head, arg)) => (head, Some(arg.trim())),
        None => (line, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn test_quantize_dc_resolution() {
        assert!(quantize_dc(0.0).abs() <= DC_LSB);
        assert!((quantize_dc(8.84) - 8.84).abs() <= DC_LSB / 2.0);
        assert_eq!(quantize_dc(25.0), quantize_dc(DC_FULL_SCALE));
        assert!((quantize_dc(-10.0) + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_dcdac_voltage_round_trip() {
        let mut sim = dcdac5764();
        sim.write_line("channel3:VOLTAGE 1.5").unwrap();
        let reply = sim.query("channel3:VOLTAGE?").unwrap();
        let volts: f64 = reply.parse().unwrap();
        assert!((volts - 1.5).abs() <= DC_LSB);

        // other channels untouched
        assert_eq!(sim.query("channel4:VOLTAGE?").unwrap(), format!("{:.6}", 0.0));
    }

    #[test]
    fn test_dcdac_ignores_unknown_channel() {
        let mut sim = dcdac5764();
        sim.write_line("channel9:VOLTAGE?").unwrap();
        assert!(sim.read_line().is_err());
    }

    #[test]
    fn test_acdac_chained_commands() {
        let mut sim = acdac9106();
        sim.write_line("CHAN2:PHASE 24;PAT:UPDATE").unwrap();
        assert_eq!(sim.query("CHAN2:PHASE?").unwrap(), "24");
        sim.write_line("FREQ 24000;PAT:UPDATE").unwrap();
        assert_eq!(sim.query("FREQ?").unwrap(), "24000");
    }

    #[test]
    fn test_acdac_error_queue() {
        let mut sim = acdac9106();
        sim.write_line("FREQ abc").unwrap();
        assert!(sim.query("SYS:ERR?").unwrap().starts_with("-224"));
        assert_eq!(sim.query("SYS:ERR?").unwrap(), "0,\"No error\"");
    }
}
