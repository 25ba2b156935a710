//! # Fatigue Tester DAQ Library
//!
//! Acquisition core for a fatigue-testing instrument that streams one ASCII
//! frame per test cycle over a serial link. The library reads frames,
//! decodes them into [`protocol::Record`]s, fans the records out to
//! independent sinks (CSV log, live display buffer, channels) and watches
//! for loss of data flow.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: frame format, `Record`, `FrameDecoder`, `RecordValidator`
//!   and the instrument error code table.
//! - **`transport`**: the `Transport` trait with a serial port and a
//!   synthetic implementation.
//! - **`pipeline`**: `IngestionPipeline` with its producer/consumer tasks,
//!   hand-off queue and sink fan-out.
//! - **`watchdog`**: level-triggered stall detection.
//! - **`sinks`**: the `RecordSink` trait plus CSV, series and channel sinks.
//! - **`generator`**: synthetic frame generation and frame-file checking.
//! - **`config`**: `AcquisitionConfig` loaded with figment.
//! - **`tracing_setup`**: tracing subscriber initialisation.
//! - **`error`**: the crate-wide `DaqError`.
//!
//! ## Example
//!
//! ```no_run
//! use fatigue_daq::config::AcquisitionConfig;
//! use fatigue_daq::pipeline::IngestionPipeline;
//! use fatigue_daq::protocol::{FrameDecoder, RecordValidator};
//! use fatigue_daq::sinks::{CsvLogSink, SeriesBuffer, SeriesSink};
//! use fatigue_daq::transport;
//!
//! # async fn run() -> fatigue_daq::error::AppResult<()> {
//! let config = AcquisitionConfig::load()?;
//! config.validate()?;
//!
//! let display = SeriesBuffer::new();
//! let mut pipeline = IngestionPipeline::from_config(&config);
//! pipeline.add_sink(CsvLogSink::new(config.logging.clone()))?;
//! pipeline.add_sink(SeriesSink::new(display.clone()))?;
//!
//! pipeline
//!     .start(
//!         transport::from_config(&config.transport),
//!         FrameDecoder::new(),
//!         RecordValidator::new(),
//!     )
//!     .await?;
//! tokio::signal::ctrl_c().await?;
//! pipeline.stop().await?;
//! println!("{} records", display.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod protocol;
pub mod sinks;
pub mod tracing_setup;
pub mod transport;
pub mod watchdog;
