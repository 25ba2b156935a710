//! Configuration loading from files and environment variables.

use fatigue_daq::config::{AcquisitionConfig, TransportKind};
use fatigue_daq::error::DaqError;
use fatigue_daq::pipeline::BackpressurePolicy;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 3] = [
    "FATIGUE_DAQ_TRANSPORT__ENDPOINT_ID",
    "FATIGUE_DAQ_PIPELINE__QUEUE_CAPACITY",
    "FATIGUE_DAQ_WATCHDOG__STALL_THRESHOLD_SECONDS",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_env();
    let config = AcquisitionConfig::load_from("/nonexistent/acquisition.toml").unwrap();
    assert_eq!(config, AcquisitionConfig::default());
}

#[test]
#[serial]
fn test_file_values_loaded() {
    clear_env();
    let file = write_config(
        r#"
        [application]
        log_level = "debug"

        [transport]
        kind = "synthetic"
        baud_rate = 9600
        parity = "E"

        [transport.synthetic]
        interval = "20ms"
        end_after = 500
        frames = ["DTA;1;182;263;0;793;2238;0;611;0;!"]

        [pipeline]
        backpressure_policy = "block"
        backpressure_wait = "10ms"

        [logging]
        output_dir = "/tmp/fatigue-logs"
        base_filename = "specimen"
        "#,
    );

    let config = AcquisitionConfig::load_from(file.path()).unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.transport.kind, TransportKind::Synthetic);
    assert_eq!(config.transport.baud_rate, 9600);
    assert_eq!(config.transport.parity, "E");
    assert_eq!(config.transport.synthetic.interval, Duration::from_millis(20));
    assert_eq!(config.transport.synthetic.end_after, Some(500));
    assert_eq!(config.transport.synthetic.frames.len(), 1);
    assert_eq!(config.pipeline.backpressure_policy, BackpressurePolicy::Block);
    assert_eq!(config.pipeline.backpressure_wait, Duration::from_millis(10));
    assert_eq!(config.logging.base_filename, "specimen");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config(
        r#"
        [transport]
        endpoint_id = "COM7"

        [pipeline]
        queue_capacity = 16
        "#,
    );

    std::env::set_var("FATIGUE_DAQ_TRANSPORT__ENDPOINT_ID", "/dev/ttyUSB1");
    std::env::set_var("FATIGUE_DAQ_PIPELINE__QUEUE_CAPACITY", "64");
    std::env::set_var("FATIGUE_DAQ_WATCHDOG__STALL_THRESHOLD_SECONDS", "2.5");

    let result = AcquisitionConfig::load_from(file.path());
    clear_env();

    let config = result.unwrap();
    assert_eq!(config.transport.endpoint_id, "/dev/ttyUSB1");
    assert_eq!(config.pipeline.queue_capacity, 64);
    assert_eq!(config.watchdog.threshold(), Duration::from_millis(2500));
}

#[test]
#[serial]
fn test_invalid_values_rejected_after_loading() {
    clear_env();
    let file = write_config(
        r#"
        [transport]
        stop_bits = 3
        "#,
    );
    let config = AcquisitionConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, DaqError::Configuration(_)));
    assert!(err.to_string().contains("stop_bits"));
}

#[test]
#[serial]
fn test_malformed_duration_is_a_load_error() {
    clear_env();
    let file = write_config(
        r#"
        [transport]
        read_timeout = "soon"
        "#,
    );
    assert!(matches!(
        AcquisitionConfig::load_from(file.path()),
        Err(DaqError::Config(_))
    ));
}
