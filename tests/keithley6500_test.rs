//! Keithley DMM6500 driver against a scripted meter.

use barrera_lab_drivers::drivers::{AveragingType, ConnectOptions, Keithley6500};
use barrera_lab_drivers::snapshot::SnapshotValue;
use barrera_lab_drivers::transport::{MockTransport, WriteLog};
use barrera_lab_drivers::{DriverError, Value};
use std::collections::HashMap;

const IDN: &str = "KEITHLEY INSTRUMENTS,MODEL DMM6500,04455266,1.7.12b";

/// A meter that remembers every `<header> <value>` write and answers
/// `<header>?` with it.
fn scripted_meter(language: &'static str) -> MockTransport {
    let mut registers: HashMap<String, String> = HashMap::from([
        ("SENS:FUNC".to_string(), "\"VOLT:DC\"".to_string()),
        ("DISP:VOLT:DC:DIG".to_string(), "6".to_string()),
        ("VOLT:DC:NPLC".to_string(), "1".to_string()),
        ("VOLT:DC:RANG:AUTO".to_string(), "1".to_string()),
        ("VOLT:DC:AVER:TCON".to_string(), "REP".to_string()),
        ("VOLT:DC:AVER:STAT".to_string(), "0".to_string()),
        ("CURR:AC:AVER:COUN".to_string(), "1.000000E+01".to_string()),
        ("DISP:LIGH:STAT".to_string(), "ON50".to_string()),
        (":VOLT:DC:INP".to_string(), "MOHM10".to_string()),
    ]);

    MockTransport::new(move |line| {
        match line {
            "*IDN?" => return Some(IDN.to_string()),
            "*LANG?" => return Some(language.to_string()),
            "READ?" => return Some("-1.234567E-03".to_string()),
            _ => {}
        }
        if let Some(header) = line.strip_suffix('?') {
            return registers.get(header).cloned();
        }
        if let Some((header, value)) = line.split_once(' ') {
            let value = value.trim_matches('\'');
            let stored = if header == "SENS:FUNC" {
                format!("\"{value}\"")
            } else {
                value.to_string()
            };
            registers.insert(header.to_string(), stored);
        }
        None
    })
}

fn connect() -> (Keithley6500, WriteLog) {
    let transport = scripted_meter("SCPI");
    let log = transport.log();
    let dmm = Keithley6500::connect(transport, &ConnectOptions::new("dmm")).unwrap();
    (dmm, log)
}

#[test]
fn test_connect_sequence() {
    let (dmm, log) = connect();
    assert_eq!(log.lines(), vec!["*IDN?", "*LANG?", "FORM:DATA ASCII"]);
    assert_eq!(
        dmm.instrument().identity().model.as_deref(),
        Some("MODEL DMM6500")
    );
}

#[test]
fn test_connect_with_reset() {
    let transport = scripted_meter("SCPI");
    let log = transport.log();
    Keithley6500::connect(transport, &ConnectOptions::new("dmm").reset(true)).unwrap();
    assert_eq!(log.lines(), vec!["*IDN?", "*LANG?", "*RST", "FORM:DATA ASCII"]);
}

#[test]
fn test_tsp_meter_is_rejected() {
    let err =
        Keithley6500::connect(scripted_meter("TSP"), &ConnectOptions::new("dmm")).unwrap_err();
    assert!(matches!(
        err,
        DriverError::CommandSet { ref expected, ref found } if expected == "SCPI" && found == "TSP"
    ));
}

#[test]
fn test_mode_mapping() {
    let (mut dmm, log) = connect();
    assert_eq!(dmm.mode().unwrap(), "dc voltage");

    dmm.set_mode("ac current").unwrap();
    assert_eq!(log.last().as_deref(), Some("SENS:FUNC 'CURR:AC'"));
    assert_eq!(dmm.mode().unwrap(), "ac current");

    assert!(dmm.set_mode("dc power").unwrap_err().is_validation());
}

#[test]
fn test_mode_dependent_settings_follow_the_mode() {
    let (mut dmm, log) = connect();
    assert_eq!(dmm.nplc().unwrap(), 1.0);
    dmm.set_nplc(5.0).unwrap();
    assert_eq!(log.last().as_deref(), Some("VOLT:DC:NPLC 5"));
    assert!(dmm.set_nplc(20.0).unwrap_err().is_validation());

    assert_eq!(dmm.averaging_type().unwrap(), AveragingType::Repeat);
    dmm.set_averaging_type(AveragingType::Moving).unwrap();
    assert_eq!(log.last().as_deref(), Some("VOLT:DC:AVER:TCON moving"));
    assert_eq!(dmm.averaging_type().unwrap(), AveragingType::Moving);

    dmm.set_mode("ac current").unwrap();
    assert_eq!(dmm.averaging_count().unwrap(), 10);
    assert!(dmm.set_averaging_count(101).unwrap_err().is_validation());
    dmm.set_averaging_enabled(true).unwrap();
    assert_eq!(log.last().as_deref(), Some("CURR:AC:AVER:STAT 1"));
    assert!(dmm.averaging_enabled().unwrap());
}

#[test]
fn test_input_impedance_only_in_dc_voltage() {
    let (mut dmm, log) = connect();
    assert_eq!(dmm.input_impedance().unwrap(), "10");
    dmm.set_input_impedance("auto").unwrap();
    assert_eq!(log.last().as_deref(), Some(":VOLT:DC:INP AUTO"));

    dmm.set_mode("2w resistance").unwrap();
    let sent = log.len();
    assert!(dmm.set_input_impedance("10").unwrap_err().is_validation());
    // only the mode query went out
    assert_eq!(log.len(), sent + 1);
}

#[test]
fn test_backlight_and_trigger_count() {
    let (mut dmm, log) = connect();
    let instrument = dmm.instrument_mut();
    assert_eq!(
        instrument.get("display_backlight").unwrap().as_str(),
        Some("On 50")
    );
    instrument.set("display_backlight", "Blackout").unwrap();
    assert_eq!(log.last().as_deref(), Some("DISP:LIGH:STAT BLACkout"));

    instrument.set("trigger_count", 250).unwrap();
    assert_eq!(log.last().as_deref(), Some("ROUT:SCAN:COUN:SCAN 250"));
    instrument.set("trigger_count", "inf").unwrap();
    assert_eq!(log.last().as_deref(), Some("ROUT:SCAN:COUN:SCAN inf"));
    assert!(instrument.set("trigger_count", 0).unwrap_err().is_validation());

    instrument.set("trigger2_source", "external").unwrap();
    assert_eq!(log.last().as_deref(), Some("TRIG:TIM2:STAR:STIM EXT"));
    assert!(instrument.set("trigger1_delay", -1.0).unwrap_err().is_validation());
}

#[test]
fn test_amplitude_is_read_only() {
    let (mut dmm, _log) = connect();
    assert_eq!(dmm.amplitude().unwrap(), -1.234567e-3);
    assert!(matches!(
        dmm.instrument_mut().set("amplitude", 1.0),
        Err(DriverError::NotSettable(_))
    ));
}

#[test]
fn test_trigger_commands() {
    let (mut dmm, log) = connect();
    log.clear();
    dmm.trigger().unwrap();
    dmm.continuous_measure().unwrap();
    assert_eq!(
        log.lines(),
        vec![
            "INIT",
            ":TRIG:LOAD \"DurationLoop\", 10, 0.01",
            "INIT",
            "*WAI"
        ]
    );
}

#[test]
fn test_digits_reads_integer() {
    let (mut dmm, _log) = connect();
    assert_eq!(dmm.instrument_mut().get("digits").unwrap(), Value::Int(6));
}

#[test]
fn test_snapshot_reports_mode_settings() {
    let (mut dmm, log) = connect();
    let snapshot = dmm.snapshot(true);

    // 16 fixed rows, then one per mode-dependent setting
    assert_eq!(snapshot.len(), 22);
    assert_eq!(
        snapshot.row("amplitude").map(|r| r.unit.as_str()),
        Some("a.u.")
    );
    assert_eq!(
        snapshot.value("nplc"),
        Some(&SnapshotValue::Value(Value::Float(1.0)))
    );
    assert_eq!(
        snapshot.value("auto_range_enabled"),
        Some(&SnapshotValue::Value(Value::Bool(true)))
    );
    assert_eq!(
        snapshot.value("averaging_type"),
        Some(&SnapshotValue::Value(Value::Text("repeat".into())))
    );
    assert_eq!(
        snapshot.value("averaging_enabled"),
        Some(&SnapshotValue::Value(Value::Bool(false)))
    );
    // the meter never answers these
    assert!(snapshot.value("range").unwrap().is_failed());
    assert!(snapshot.value("averaging_count").unwrap().is_failed());
    assert!(log.lines().contains(&"VOLT:DC:AVER:COUN?".to_string()));
}

#[test]
fn test_cached_snapshot_follows_the_mode() {
    let (mut dmm, log) = connect();
    dmm.set_mode("ac current").unwrap();
    dmm.set_averaging_count(25).unwrap();

    let sent = log.len();
    let snapshot = dmm.snapshot(false);
    assert_eq!(log.len(), sent);
    assert_eq!(
        snapshot.value("averaging_count"),
        Some(&SnapshotValue::Value(Value::Int(25)))
    );
    assert!(snapshot.value("nplc").unwrap().is_unset());
}

#[test]
fn test_reset_forgets_mode_settings() {
    let (mut dmm, _log) = connect();
    dmm.mode().unwrap();
    dmm.set_nplc(2.0).unwrap();
    dmm.reset().unwrap();

    let snapshot = dmm.snapshot(false);
    assert!(snapshot.value("mode").unwrap().is_unset());
    assert!(snapshot.value("nplc").unwrap().is_unset());
}

#[test]
fn test_snapshot_without_mode_fails_mode_settings() {
    let transport = MockTransport::new(|line| match line {
        "*IDN?" => Some(IDN.to_string()),
        "*LANG?" => Some("SCPI".to_string()),
        _ => None,
    });
    let log = transport.log();
    let mut dmm = Keithley6500::connect(transport, &ConnectOptions::new("dmm")).unwrap();

    let snapshot = dmm.snapshot(true);
    assert!(snapshot.value("mode").unwrap().is_failed());
    assert!(snapshot.value("nplc").unwrap().is_failed());
    assert!(!log.lines().iter().any(|l| l.ends_with(":NPLC?")));
}
