//! Decoded measurement record.
//!
//! A [`Record`] is the structured form of one instrument frame. It is built
//! once by the [`FrameDecoder`](super::FrameDecoder) and never mutated
//! afterwards; the pipeline hands it to sinks behind an `Arc`.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

use super::error_codes;

/// Wire token for an active test cycle.
pub const STATUS_ACTIVE: &str = "DTA";
/// Wire token for a completed test.
pub const STATUS_END: &str = "END";

/// Test-cycle phase marker carried in field 0 of a frame.
///
/// Decoding keeps unknown tokens verbatim in [`Status::Other`] so that the
/// validator, not the decoder, decides whether the record is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// `DTA`: the instrument is cycling.
    Active,
    /// `END`: the test has finished.
    End,
    /// Any other token.
    Other(String),
}

impl Status {
    /// Parse a status token. Never fails.
    pub fn from_token(token: &str) -> Self {
        match token {
            STATUS_ACTIVE => Status::Active,
            STATUS_END => Status::End,
            other => Status::Other(other.to_string()),
        }
    }

    /// The wire token for this status.
    pub fn as_token(&self) -> &str {
        match self {
            Status::Active => STATUS_ACTIVE,
            Status::End => STATUS_END,
            Status::Other(token) => token,
        }
    }

    /// Whether this is one of the two tokens the instrument documents.
    pub fn is_known(&self) -> bool {
        !matches!(self, Status::Other(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_token())
    }
}

/// Fixed-point quantity as transmitted by the instrument.
///
/// The raw integer is kept so that re-encoding is exact; `DIV` is the implied
/// divisor (10 for forces, 100 for positions and travels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint<const DIV: i64>(i64);

/// Two implied fraction digits (mm).
pub type Hundredths = FixedPoint<100>;
/// One implied fraction digit (N).
pub type Tenths = FixedPoint<10>;

impl<const DIV: i64> FixedPoint<DIV> {
    /// The implied divisor.
    pub const DIVISOR: i64 = DIV;

    /// Wrap an encoded integer.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The encoded integer exactly as it appeared on the wire.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Decimal value in engineering units.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / DIV as f64
    }

    /// Number of fraction digits implied by the divisor.
    pub fn fraction_digits() -> usize {
        let mut digits = 0;
        let mut div = DIV;
        while div >= 10 {
            div /= 10;
            digits += 1;
        }
        digits
    }
}

impl<const DIV: i64> fmt::Display for FixedPoint<DIV> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", Self::fraction_digits(), self.to_f64())
    }
}

impl<const DIV: i64> Serialize for FixedPoint<DIV> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

/// One decoded instrument sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Local time at which the frame was decoded.
    pub captured_at: DateTime<Local>,
    /// Frame status token.
    pub status: Status,
    /// Test cycle number.
    pub cycle_count: i64,
    /// Position 1, mm.
    pub position_1: Hundredths,
    /// Lower force, N.
    pub force_lower: Tenths,
    /// Travel 1, mm.
    pub travel_1: Hundredths,
    /// Position 2, mm.
    pub position_2: Hundredths,
    /// Upper force, N.
    pub force_upper: Tenths,
    /// Travel 2, mm.
    pub travel_2: Hundredths,
    /// Travel at upper force, mm.
    pub travel_at_upper: Hundredths,
    /// 0 means no error; see [`error_codes`].
    pub error_code: i32,
    /// The trimmed frame with its `!` terminator.
    pub raw_text: String,
}

impl Record {
    /// `travel_2 / travel_at_upper * 100`, or exactly `0.0` when the
    /// travel at upper force is zero.
    pub fn loss_of_stiffness_percent(&self) -> f64 {
        loss_of_stiffness(self.travel_2, self.travel_at_upper)
    }

    /// The instrument reported test completion.
    pub fn is_test_end(&self) -> bool {
        self.status == Status::End
    }

    /// The instrument reported a non-zero error code.
    pub fn has_error(&self) -> bool {
        self.error_code != 0
    }

    /// Human readable description of [`Record::error_code`].
    pub fn error_description(&self) -> Cow<'static, str> {
        error_codes::describe(self.error_code)
    }
}

/// Loss of stiffness in percent. A zero denominator yields `0.0`.
pub fn loss_of_stiffness(travel_2: Hundredths, travel_at_upper: Hundredths) -> f64 {
    if travel_at_upper.raw() == 0 {
        return 0.0;
    }
    travel_2.to_f64() / travel_at_upper.to_f64() * 100.0
}
