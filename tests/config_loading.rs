use std::io::Write;

use laser_align::config::{ScanConfig, SequenceKind};
use laser_align::error::ScanError;
use laser_align::measurement::Position;
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let config = ScanConfig::load_from("/nonexistent/laser_align.toml").unwrap();
    assert_eq!(config, ScanConfig::default());
}

#[test]
#[serial]
fn test_file_values_override_defaults() {
    let file = write_config(
        r#"
[sensor]
saturation_level = 4095.0
initial_gain = 20.0

[scan]
sequence = "explicit"
positions = [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]
"#,
    );

    let config = ScanConfig::load_from(file.path()).unwrap();
    assert_eq!(config.sensor.saturation_level, 4095.0);
    assert_eq!(config.sensor.gain_step, 10.0);
    assert_eq!(config.saturation_policy().saturation_level, 4095.0);
    assert_eq!(config.scan.sequence, SequenceKind::Explicit);

    let positions: Vec<_> = config.sequence().unwrap().collect();
    assert_eq!(
        positions,
        vec![Position::new(1.0, 0.0, 0.0), Position::new(2.0, 0.0, 0.0)]
    );
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[application]
log_level = "warn"

[scan]
dwell_interval_ms = 250
"#,
    );

    std::env::set_var("LASER_ALIGN_APPLICATION__LOG_LEVEL", "debug");
    std::env::set_var("LASER_ALIGN_SCAN__SEQUENCE", "fixed_timer");
    let loaded = ScanConfig::load_from(file.path());
    std::env::remove_var("LASER_ALIGN_APPLICATION__LOG_LEVEL");
    std::env::remove_var("LASER_ALIGN_SCAN__SEQUENCE");

    let config = loaded.unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.scan.sequence, SequenceKind::FixedTimer);
    assert_eq!(config.dwell_interval().as_millis(), 250);
}

#[test]
#[serial]
fn test_invalid_settings_are_rejected() {
    let file = write_config(
        r#"
[scan]
sequence = "explicit"
"#,
    );
    assert!(matches!(
        ScanConfig::load_from(file.path()),
        Err(ScanError::Configuration(_))
    ));

    let file = write_config(
        r#"
[scan]
sequence = "spiral"
"#,
    );
    assert!(matches!(
        ScanConfig::load_from(file.path()),
        Err(ScanError::Config(_))
    ));
}

#[test]
#[serial]
fn test_shipped_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/laser_align.toml");
    let config = ScanConfig::load_from(path).unwrap();
    assert_eq!(config.scan.sequence, SequenceKind::Raster);
    assert_eq!(config.raster().len(), 5);
    assert_eq!(config.scan.positions.len(), 3);
}
