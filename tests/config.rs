// Integration tests for loading configuration files from disk.

use std::fs::File;
use std::io::Write;
use tempbox::config::{load_config, Config, ConfigError, ControlMode, ControllerConfigError};
use tempbox::SensorId;
use tempfile::tempdir;

#[test]
fn test_shipped_config_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tempbox.toml");
    let config = load_config(path).unwrap();
    let defaults = Config::default();
    assert_eq!(config.regulation.setpoint_c, defaults.regulation.setpoint_c);
    assert_eq!(config.regulation.pid, defaults.regulation.pid);
    assert_eq!(config.sensors.interior, defaults.sensors.interior);
    assert_eq!(config.sensors.reference, defaults.sensors.reference);
    assert_eq!(config.fan.duty_percent, 86);
    assert_eq!(config.simulation, defaults.simulation);
}

#[test]
fn test_partial_sensor_section_has_no_reference() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("sensors.toml");
    let mut file = File::create(&file_path).unwrap();
    writeln!(file, "[sensors]\ninterior = ['2869A1693519015D', '28-D5-55-6B-35-19-01-99', '28 96 5F E3 22 20 01 62']").unwrap();
    file.flush().unwrap();

    let config = load_config(&file_path).unwrap();
    assert_eq!(config.sensors.interior.len(), 3);
    assert_eq!(config.sensors.reference, None);
    let first: SensorId = "28:69:A1:69:35:19:01:5D".parse().unwrap();
    assert_eq!(config.sensors.interior[0], first);
}

#[test]
fn test_mode_names() {
    for (name, mode) in [
        ("threshold", ControlMode::Threshold),
        ("time_proportioned_pid", ControlMode::TimeProportionedPid),
        ("pid", ControlMode::TimeProportionedPid),
    ] {
        let config: Config = toml::from_str(&format!("[regulation]\nmode = '{}'", name)).unwrap();
        assert_eq!(config.regulation.mode, mode);
    }
    assert!(toml::from_str::<Config>("[regulation]\nmode = 'fuzzy'").is_err());
}

#[test]
fn test_duplicate_sensor_is_rejected() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("dup.toml");
    let mut file = File::create(&file_path).unwrap();
    writeln!(
        file,
        "[sensors]\ninterior = ['28:69:A1:69:35:19:01:5D']\nreference = '28:69:A1:69:35:19:01:5D'"
    )
    .unwrap();
    file.flush().unwrap();

    assert!(matches!(
        load_config(&file_path),
        Err(ConfigError::Invalid(ControllerConfigError::DuplicateSensor(_)))
    ));
}

#[test]
fn test_zero_window_is_rejected() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("window.toml");
    let mut file = File::create(&file_path).unwrap();
    writeln!(file, "[regulation]\nmode = 'pid'\n[regulation.pid]\nwindow_ms = 0").unwrap();
    file.flush().unwrap();

    let err = load_config(&file_path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ControllerConfigError::ZeroPidWindow)));
    assert_eq!(err.to_string(), "invalid configuration: pid.window_ms must be > 0");
}
