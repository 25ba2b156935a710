//! Fatigue tester wire protocol: records, decoding, validation and the
//! instrument error table.

pub mod decoder;
pub mod error_codes;
pub mod record;
pub mod validator;

pub use decoder::{encode, DecodeError, FrameDecoder};
pub use record::{loss_of_stiffness, FixedPoint, Hundredths, Record, Status, Tenths};
pub use validator::{RecordValidator, ValidationFailure};
