//! ASCII frame decoder.
//!
//! Frame layout (one line per sample):
//!
//! ```text
//! <STATUS>;<cycles>;<pos1>;<forceLower>;<travel1>;<pos2>;<forceUpper>;<travel2>;<travelAtUpper>;<error>;!
//! ```
//!
//! Positions and travels carry two implied fraction digits, forces one.

use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use thiserror::Error;

use super::record::{FixedPoint, Record, Status};

/// Field separator.
pub const DELIMITER: char = ';';
/// Optional frame terminator.
pub const TERMINATOR: char = '!';
/// Tokens after terminator stripping: 10 data fields plus the empty slot
/// left by the trailing delimiter.
pub const EXPECTED_FIELDS: usize = 11;

const FIELD_NAMES: [&str; 10] = [
    "status",
    "cycle_count",
    "position_1",
    "force_lower",
    "travel_1",
    "position_2",
    "force_upper",
    "travel_2",
    "travel_at_upper",
    "error_code",
];

/// Why a frame could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected {expected} fields, got {found}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("field {index} ({field}) is not an integer: {value:?}")]
    MalformedNumber {
        /// Zero-based field position.
        index: usize,
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },
}

/// Stateless apart from two counters: decode failures and the last
/// timestamp handed out, which keeps `captured_at` non-decreasing even if
/// the wall clock steps backwards.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    failures: AtomicU64,
    last_stamp_us: AtomicI64,
}

impl FrameDecoder {
    /// Decoder with a zero failure count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame. Either every field parses or an error is returned;
    /// failures bump [`FrameDecoder::failures`].
    pub fn decode(&self, raw: &str) -> Result<Record, DecodeError> {
        self.decode_fields(raw).inspect_err(|err| {
            let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(failures = count, frame = raw, "decode failed: {err}");
        })
    }

    /// Number of frames that failed to decode so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn decode_fields(&self, raw: &str) -> Result<Record, DecodeError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_suffix(TERMINATOR).unwrap_or(trimmed);

        let parts: Vec<&str> = body.split(DELIMITER).collect();
        if parts.len() != EXPECTED_FIELDS {
            return Err(DecodeError::FieldCountMismatch {
                expected: EXPECTED_FIELDS,
                found: parts.len(),
            });
        }

        let status = Status::from_token(parts[0].trim());
        let cycle_count = parse_int(&parts, 1)?;
        let position_1 = FixedPoint::from_raw(parse_int(&parts, 2)?);
        let force_lower = FixedPoint::from_raw(parse_int(&parts, 3)?);
        let travel_1 = FixedPoint::from_raw(parse_int(&parts, 4)?);
        let position_2 = FixedPoint::from_raw(parse_int(&parts, 5)?);
        let force_upper = FixedPoint::from_raw(parse_int(&parts, 6)?);
        let travel_2 = FixedPoint::from_raw(parse_int(&parts, 7)?);
        let travel_at_upper = FixedPoint::from_raw(parse_int(&parts, 8)?);
        let error_code = parse_int(&parts, 9)?;
        let error_code = i32::try_from(error_code).map_err(|_| DecodeError::MalformedNumber {
            index: 9,
            field: FIELD_NAMES[9],
            value: parts[9].to_string(),
        })?;

        Ok(Record {
            captured_at: self.stamp(),
            status,
            cycle_count,
            position_1,
            force_lower,
            travel_1,
            position_2,
            force_upper,
            travel_2,
            travel_at_upper,
            error_code,
            raw_text: format!("{body}{TERMINATOR}"),
        })
    }

    fn stamp(&self) -> DateTime<Local> {
        let now = Local::now();
        let now_us = now.timestamp_micros();
        let previous = self.last_stamp_us.fetch_max(now_us, Ordering::AcqRel);
        if previous > now_us {
            if let Some(prev) = DateTime::<Utc>::from_timestamp_micros(previous) {
                return prev.with_timezone(&Local);
            }
        }
        now
    }
}

fn parse_int(parts: &[&str], index: usize) -> Result<i64, DecodeError> {
    let text = parts[index].trim();
    text.parse::<i64>()
        .map_err(|_| DecodeError::MalformedNumber {
            index,
            field: FIELD_NAMES[index],
            value: text.to_string(),
        })
}

/// Re-encode a record into its wire form (inverse of [`FrameDecoder::decode`]).
pub fn encode(record: &Record) -> String {
    format!(
        "{status};{cycles};{p1};{fl};{t1};{p2};{fu};{t2};{tu};{err};{TERMINATOR}",
        status = record.status.as_token(),
        cycles = record.cycle_count,
        p1 = record.position_1.raw(),
        fl = record.force_lower.raw(),
        t1 = record.travel_1.raw(),
        p2 = record.position_2.raw(),
        fu = record.force_upper.raw(),
        t2 = record.travel_2.raw(),
        tu = record.travel_at_upper.raw(),
        err = record.error_code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "DTA;31422;182;263;0;793;2238;0;611;0;!";

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decodes_reference_frame() {
        let decoder = FrameDecoder::new();
        let record = decoder.decode(SAMPLE).unwrap();

        assert_eq!(record.status, Status::Active);
        assert_eq!(record.cycle_count, 31422);
        assert!(approx(record.position_1.to_f64(), 1.82));
        assert!(approx(record.force_lower.to_f64(), 26.3));
        assert!(approx(record.travel_1.to_f64(), 0.0));
        assert!(approx(record.position_2.to_f64(), 7.93));
        assert!(approx(record.force_upper.to_f64(), 223.8));
        assert!(approx(record.travel_2.to_f64(), 0.0));
        assert!(approx(record.travel_at_upper.to_f64(), 6.11));
        assert_eq!(record.error_code, 0);
        assert_eq!(record.raw_text, SAMPLE);
        assert_eq!(decoder.failures(), 0);
    }

    #[test]
    fn reencoding_is_exact() {
        let decoder = FrameDecoder::new();
        for frame in [
            SAMPLE,
            "END;5;-182;-263;-1;793;2238;-3;611;107;!",
            "DTA;0;0;0;0;0;0;0;0;0;!",
            "DTA;7;999999;1;99;1;99;1;3;12;!",
        ] {
            let record = decoder.decode(frame).unwrap();
            assert_eq!(encode(&record), frame);
        }
    }

    #[test]
    fn reencoding_generated_run_is_exact() {
        let decoder = FrameDecoder::new();
        let frames = crate::generator::generate_frames(500, true, Some(17));
        assert_eq!(frames.len(), 500);
        for frame in &frames {
            let record = decoder.decode(frame).unwrap();
            assert_eq!(&encode(&record), frame);
        }
        assert_eq!(decoder.failures(), 0);
    }

    #[test]
    fn surrounding_whitespace_and_newline_ignored() {
        let decoder = FrameDecoder::new();
        let record = decoder.decode(&format!("  {SAMPLE}\r\n")).unwrap();
        assert_eq!(record.raw_text, SAMPLE);
    }

    #[test]
    fn missing_terminator_with_trailing_delimiter_is_accepted() {
        let decoder = FrameDecoder::new();
        let record = decoder.decode("DTA;31422;182;263;0;793;2238;0;611;0;").unwrap();
        assert_eq!(record.raw_text, SAMPLE);
    }

    #[test]
    fn missing_terminator_and_delimiter_is_rejected() {
        let decoder = FrameDecoder::new();
        let err = decoder.decode("DTA;31422;182;263;0;793;2238;0;611;0").unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldCountMismatch {
                expected: 11,
                found: 10
            }
        );
    }

    #[test]
    fn wrong_field_counts_rejected() {
        let decoder = FrameDecoder::new();
        for frame in ["", "DTA", "DTA;1;2;3;!", "DTA;1;2;3;4;5;6;7;8;9;10;11;!", ";;;;;;;;;;;;"] {
            assert!(matches!(
                decoder.decode(frame),
                Err(DecodeError::FieldCountMismatch { .. })
            ));
        }
        assert_eq!(decoder.failures(), 5);
    }

    #[test]
    fn terminator_without_trailing_delimiter_is_rejected() {
        let decoder = FrameDecoder::new();
        let err = decoder.decode("DTA;31422;182;263;0;793;2238;0;611;0!").unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldCountMismatch {
                expected: 11,
                found: 10
            }
        );
    }

    #[test]
    fn non_numeric_fields_rejected() {
        let decoder = FrameDecoder::new();
        let err = decoder.decode("DTA;abc;182;263;0;793;2238;0;611;0;!").unwrap_err();
        assert_eq!(
            err,
            DecodeError::MalformedNumber {
                index: 1,
                field: "cycle_count",
                value: "abc".into()
            }
        );

        let err = decoder.decode("DTA;1;182;26.3;0;793;2238;0;611;0;!").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedNumber { index: 3, .. }));

        let err = decoder.decode("DTA;1;182;263;0;793;2238;0;611;;!").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedNumber { index: 9, .. }));
        assert_eq!(decoder.failures(), 3);
    }

    #[test]
    fn unknown_status_is_kept_for_validation() {
        let decoder = FrameDecoder::new();
        let record = decoder.decode("XYZ;1;182;263;0;793;2238;0;611;0;!").unwrap();
        assert_eq!(record.status, Status::Other("XYZ".into()));
    }

    #[test]
    fn timestamps_never_decrease() {
        let decoder = FrameDecoder::new();
        let mut last = decoder.decode(SAMPLE).unwrap().captured_at;
        for _ in 0..200 {
            let next = decoder.decode(SAMPLE).unwrap().captured_at;
            assert!(next >= last);
            last = next;
        }
    }
}
