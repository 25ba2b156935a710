//! Frame transports.
//!
//! A [`Transport`] yields raw text frames from the instrument link. Two
//! variants exist:
//!
//! - [`SerialTransport`]: a physical RS-232 / USB-serial port
//! - [`SyntheticTransport`]: generated or scripted frames, no hardware needed
//!
//! The ingestion producer task owns its transport exclusively. Every
//! `read_frame` call is bounded by the configured read timeout and returns
//! [`ReadOutcome::Timeout`] when nothing arrived, so the producer can observe
//! a stop request within one timeout.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::config::{TransportConfig, TransportKind};

pub mod serial;
pub mod synthetic;

pub use serial::{SerialSettings, SerialTransport};
pub use synthetic::SyntheticTransport;

/// Transport-level failures. Opening is fatal to `connect`; read failures
/// end the producer task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open '{endpoint}': {reason}")]
    OpenFailed { endpoint: String, reason: String },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line of text with line endings stripped.
    Frame(String),
    /// The read timeout elapsed with no complete frame. Not an error.
    Timeout,
}

/// Point-in-time transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Raw bytes received, line terminators included.
    pub bytes_read: u64,
    /// Complete frames returned.
    pub frames_read: u64,
    /// Link is open.
    pub connected: bool,
}

/// Source of raw frames.
#[async_trait]
pub trait Transport: Send {
    /// Open the link. Must be called before `read_frame`.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Wait at most the configured read timeout for the next frame.
    async fn read_frame(&mut self) -> Result<ReadOutcome, TransportError>;

    /// Release the link. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn stats(&self) -> TransportStats;

    /// Short description for logs, e.g. `serial(/dev/ttyUSB0 @ 115200)`.
    fn describe(&self) -> String;
}

/// Build the transport selected by configuration.
pub fn from_config(config: &TransportConfig) -> Box<dyn Transport> {
    match config.kind {
        TransportKind::Serial => Box::new(SerialTransport::new(SerialSettings::from(config))),
        TransportKind::Synthetic => Box::new(SyntheticTransport::from_config(config)),
    }
}

/// Counters shared by the transport implementations.
#[derive(Debug, Default)]
pub(crate) struct TransportCounters {
    bytes_read: AtomicU64,
    frames_read: AtomicU64,
    connected: AtomicBool,
}

impl TransportCounters {
    pub(crate) fn add_bytes(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_frame(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}
