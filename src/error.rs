//! Custom error types for the acquisition crate.
//!
//! `DaqError` is the crate-wide error returned by configuration loading,
//! pipeline lifecycle calls and the CSV log sink. Component errors that the
//! pipeline handles per frame ([`DecodeError`], [`ValidationFailure`]) and
//! transport failures ([`TransportError`]) have their own enums and convert
//! into `DaqError` via `#[from]`, so `?` composes across layers.
//!
//! - **`Config`**: the configuration file or environment could not be parsed.
//! - **`Configuration`**: values parsed but are semantically invalid.
//! - **`Transport`**: opening or reading the instrument link failed.
//! - **`Decode`** / **`Validation`**: a single frame was rejected.
//! - **`Io`** / **`Csv`**: log file operations failed.
//! - **`AlreadyRunning`**: `start` called on a running pipeline.

use thiserror::Error;

use crate::protocol::{DecodeError, ValidationFailure};
use crate::transport::TransportError;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No active log file")]
    NoActiveLog,

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the acquisition can continue after this error.
    ///
    /// Per-frame problems are recoverable; configuration, transport and
    /// storage failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DaqError::Decode(_) | DaqError::Validation(_))
    }
}
