//! Configuration loading from files and the environment.

use barrera_lab_drivers::config::{InstrumentModel, Settings};
use barrera_lab_drivers::drivers::Driver;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/labdrivers.toml");
    let settings = Settings::load_from(path).unwrap();
    assert_eq!(settings.instruments.len(), 5);
    assert_eq!(settings.enabled_instruments().count(), 3);

    let dc = settings.instrument("dc_dac").unwrap();
    assert_eq!(dc.model, InstrumentModel::Dcdac5764);
    assert_eq!(dc.baud_rate, 115200);
    assert_eq!(dc.boot_delay, Some(Duration::from_secs(3)));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [application]
        log_level = "info"
        "#,
    );
    std::env::set_var("LABDRIVERS_APPLICATION__LOG_LEVEL", "debug");
    let settings = Settings::load_from(file.path());
    std::env::remove_var("LABDRIVERS_APPLICATION__LOG_LEVEL");

    assert_eq!(settings.unwrap().application.log_level, "debug");
}

#[test]
#[serial]
fn test_unknown_model_is_a_config_error() {
    let file = write_config(
        r#"
        [[instruments]]
        id = "scope"
        model = "tektronix"
        port = "/dev/ttyUSB3"
        "#,
    );
    let err = Settings::load_from(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}

#[test]
#[serial]
fn test_shared_port_rejected() {
    let file = write_config(
        r#"
        [[instruments]]
        id = "dc"
        model = "dcdac5764"
        port = "/dev/ttyACM0"

        [[instruments]]
        id = "ac"
        model = "acdac9106"
        port = "/dev/ttyACM0"
        "#,
    );
    let err = Settings::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("/dev/ttyACM0"));
}

#[test]
#[serial]
fn test_simulated_instruments_connect() {
    let file = write_config(
        r#"
        [[instruments]]
        id = "dc_sim"
        model = "dcdac5764"
        simulated = true
        timeout = "1s"

        [[instruments]]
        id = "ac_sim"
        model = "acdac9106"
        simulated = true
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    for config in settings.enabled_instruments() {
        let mut driver = Driver::open(config).unwrap();
        assert_eq!(driver.model(), config.model);
        assert_eq!(driver.instrument().timeout(), config.timeout);
        assert_eq!(driver.snapshot(true).failures().count(), 0);
    }
}
