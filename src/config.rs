//! Acquisition configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/acquisition.toml`)
//! 2. environment variables prefixed with `FATIGUE_DAQ_`, nested keys split
//!    on `__` (e.g. `FATIGUE_DAQ_TRANSPORT__ENDPOINT_ID=/dev/ttyUSB0`)
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration for the synthetic transport.
//!
//! # Example
//! ```no_run
//! use fatigue_daq::config::AcquisitionConfig;
//!
//! let config = AcquisitionConfig::load()?;
//! config.validate()?;
//! println!("Reading from {}", config.transport.endpoint_id);
//! # Ok::<(), fatigue_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::pipeline::queue::BackpressurePolicy;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/acquisition.toml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FATIGUE_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Application name and log settings
    pub application: ApplicationConfig,
    /// Instrument link
    pub transport: TransportConfig,
    /// Stall detection
    pub watchdog: WatchdogConfig,
    /// Hand-off queue and sink dispatch
    pub pipeline: PipelineConfig,
    /// CSV record log
    pub logging: LogConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Display name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Fatigue Tester DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Which [`Transport`](crate::transport::Transport) variant to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Physical serial port
    #[default]
    Serial,
    /// Generated or scripted frames
    Synthetic,
}

/// Instrument link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Which transport to build
    pub kind: TransportKind,
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub endpoint_id: String,
    /// Line speed
    pub baud_rate: u32,
    /// Data bits, 5 to 8
    pub byte_size: u8,
    /// "N", "E" or "O"
    pub parity: String,
    /// 1 or 2
    pub stop_bits: u8,
    /// Upper bound for a single blocking frame read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Used when `kind = "synthetic"`
    pub synthetic: SyntheticConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
            endpoint_id: "COM3".to_string(),
            baud_rate: 115_200,
            byte_size: 8,
            parity: "N".to_string(),
            stop_bits: 1,
            read_timeout: Duration::from_secs(1),
            synthetic: SyntheticConfig::default(),
        }
    }
}

/// Settings for the synthetic transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Cadence between generated frames
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// RNG seed for reproducible output; random when unset
    pub seed: Option<u64>,
    /// Inject an instrument error code every N cycles (0 disables)
    pub error_every: u64,
    /// Emit an END frame at this cycle and then fall silent
    pub end_after: Option<u64>,
    /// Replay these frames instead of generating; silent once exhausted
    pub frames: Vec<String>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            seed: None,
            error_every: 20,
            end_after: None,
            frames: Vec::new(),
        }
    }
}

/// Stall detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Silence after which a stall is reported
    pub stall_threshold_seconds: f64,
    /// Check cadence; defaults to the threshold itself
    #[serde(with = "humantime_serde")]
    pub check_interval: Option<Duration>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_threshold_seconds: 5.0,
            check_interval: None,
        }
    }
}

impl WatchdogConfig {
    /// Stall threshold as a `Duration` (5 s if unrepresentable).
    pub fn threshold(&self) -> Duration {
        Duration::try_from_secs_f64(self.stall_threshold_seconds)
            .unwrap_or_else(|_| Duration::from_secs(5))
    }

    /// Effective check cadence.
    pub fn tick(&self) -> Duration {
        self.check_interval.unwrap_or_else(|| self.threshold())
    }
}

/// Hand-off queue and sink dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames held between producer and consumer
    pub queue_capacity: usize,
    /// What a full queue does to the producer
    pub backpressure_policy: BackpressurePolicy,
    /// How long a full queue blocks the producer before evicting (block policy)
    #[serde(with = "humantime_serde")]
    pub backpressure_wait: Duration,
    /// Consumer poll interval, bounds how quickly stop is observed
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Per-sink channel capacity
    pub sink_capacity: usize,
    /// Longest the consumer waits on one full sink channel
    #[serde(with = "humantime_serde")]
    pub sink_handoff_timeout: Duration,
    /// Longest `stop()` waits for a sink to drain
    #[serde(with = "humantime_serde")]
    pub sink_shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure_policy: BackpressurePolicy::Block,
            backpressure_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
            sink_capacity: 1024,
            sink_handoff_timeout: Duration::from_millis(50),
            sink_shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// CSV log file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for log files
    pub output_dir: PathBuf,
    /// File name prefix
    pub base_filename: String,
    /// Including the dot
    pub file_extension: String,
    /// chrono format string for the file name stamp
    pub timestamp_format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            base_filename: "fatigue_test".to_string(),
            file_extension: ".csv".to_string(),
            timestamp_format: "%Y%m%d_%H%M%S".to_string(),
        }
    }
}

impl AcquisitionConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path merged with `FATIGUE_DAQ_*` variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse a TOML string (no environment overlay).
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config = Figment::new().merge(Toml::string(toml)).extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let transport = &self.transport;
        if transport.kind == TransportKind::Serial && transport.endpoint_id.trim().is_empty() {
            return Err(invalid("endpoint_id must not be empty".to_string()));
        }
        if transport.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0".to_string()));
        }
        if !(5..=8).contains(&transport.byte_size) {
            return Err(invalid(format!(
                "Invalid byte_size {}. Must be 5-8",
                transport.byte_size
            )));
        }
        if !["N", "E", "O"].contains(&transport.parity.to_uppercase().as_str()) {
            return Err(invalid(format!(
                "Invalid parity '{}'. Must be one of: N, E, O",
                transport.parity
            )));
        }
        if !matches!(transport.stop_bits, 1 | 2) {
            return Err(invalid(format!(
                "Invalid stop_bits {}. Must be 1 or 2",
                transport.stop_bits
            )));
        }
        if transport.read_timeout.is_zero() {
            return Err(invalid("read_timeout must be greater than 0".to_string()));
        }
        if transport.kind == TransportKind::Synthetic && transport.synthetic.interval.is_zero() {
            return Err(invalid("synthetic.interval must be greater than 0".to_string()));
        }
        if transport.synthetic.end_after == Some(0) {
            return Err(invalid(
                "synthetic.end_after must be at least 1 (omit it to run forever)".to_string(),
            ));
        }

        let threshold = self.watchdog.stall_threshold_seconds;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(format!(
                "Invalid stall_threshold_seconds {threshold}. Must be positive"
            )));
        }
        if let Some(tick) = self.watchdog.check_interval {
            if tick.is_zero() || tick > self.watchdog.threshold() {
                return Err(invalid(format!(
                    "watchdog check_interval {tick:?} must be non-zero and at most the stall threshold"
                )));
            }
        }

        let pipeline = &self.pipeline;
        if pipeline.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0".to_string()));
        }
        if pipeline.sink_capacity == 0 {
            return Err(invalid("sink_capacity must be greater than 0".to_string()));
        }
        if pipeline.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than 0".to_string()));
        }

        if self.logging.base_filename.trim().is_empty() {
            return Err(invalid("logging.base_filename must not be empty".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> DaqError {
    DaqError::Configuration(message)
}
