//! Structural validation of decoded records.
//!
//! Only nonsensical records are rejected: an unknown status token or a
//! negative cycle count. Measurements are not range checked; negative
//! positions, forces and travels are legitimate instrument output, and
//! the upper force is not required to exceed the lower one.

use thiserror::Error;

use super::record::{Record, Status};

/// Reason a record was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("Invalid status: {0}")]
    UnknownStatus(String),

    #[error("Invalid cycle count (negative): {0}")]
    NegativeCycleCount(i64),
}

/// Pure predicate over [`Record`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordValidator;

impl RecordValidator {
    /// Stateless validator.
    pub fn new() -> Self {
        Self
    }

    /// Check a record without modifying it.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationFailure> {
        if let Status::Other(token) = &record.status {
            return Err(ValidationFailure::UnknownStatus(token.clone()));
        }
        if record.cycle_count < 0 {
            return Err(ValidationFailure::NegativeCycleCount(record.cycle_count));
        }
        Ok(())
    }

    /// `(is_valid, reason)` form, `"OK"` when valid.
    pub fn check(&self, record: &Record) -> (bool, String) {
        match self.validate(record) {
            Ok(()) => (true, "OK".to_string()),
            Err(failure) => (false, failure.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameDecoder;

    fn decode(frame: &str) -> Record {
        FrameDecoder::new().decode(frame).unwrap()
    }

    #[test]
    fn accepts_both_known_statuses() {
        let validator = RecordValidator::new();
        assert!(validator.validate(&decode("DTA;1;182;263;0;793;2238;0;611;0;!")).is_ok());
        assert!(validator.validate(&decode("END;1;182;263;0;793;2238;0;611;0;!")).is_ok());
    }

    #[test]
    fn rejects_unknown_status() {
        let validator = RecordValidator::new();
        let record = decode("BAD;1;182;263;0;793;2238;0;611;0;!");
        let err = validator.validate(&record).unwrap_err();
        assert_eq!(err, ValidationFailure::UnknownStatus("BAD".into()));
        assert!(err.to_string().contains("BAD"));
    }

    #[test]
    fn rejects_negative_cycles() {
        let validator = RecordValidator::new();
        let record = decode("DTA;-1;182;263;0;793;2238;0;611;0;!");
        assert_eq!(
            validator.validate(&record),
            Err(ValidationFailure::NegativeCycleCount(-1))
        );
    }

    #[test]
    fn accepts_negative_measurements() {
        let validator = RecordValidator::new();
        let record = decode("DTA;3;-182;-263;-5;-793;-2238;-2;-611;0;!");
        assert!(validator.validate(&record).is_ok());
        // lower force above upper force is not enforced
        let record = decode("DTA;3;182;5000;0;793;10;0;611;0;!");
        assert!(validator.validate(&record).is_ok());
    }

    #[test]
    fn check_reports_reason() {
        let validator = RecordValidator::new();
        let (ok, reason) = validator.check(&decode("DTA;1;182;263;0;793;2238;0;611;0;!"));
        assert!(ok);
        assert_eq!(reason, "OK");
        let (ok, reason) = validator.check(&decode("ZZZ;1;182;263;0;793;2238;0;611;0;!"));
        assert!(!ok);
        assert_eq!(reason, "Invalid status: ZZZ");
    }

    #[test]
    fn validation_does_not_mutate() {
        let validator = RecordValidator::new();
        let record = decode("DTA;-4;182;263;0;793;2238;0;611;0;!");
        let before = record.clone();
        let _ = validator.validate(&record);
        assert_eq!(record, before);
    }
}
