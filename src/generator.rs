//! Synthetic frame generation and frame-file checking.
//!
//! The generator mimics plausible instrument output: small bounded jitter
//! around baseline position, force and travel values, with error codes
//! injected on a fixed cycle period. It backs the synthetic transport and
//! the `generate` CLI command; [`check_frames`] backs the `check` command.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::protocol::record::{STATUS_ACTIVE, STATUS_END};
use crate::protocol::{FrameDecoder, RecordValidator};

/// Baseline encoded values (1.80 mm, 25.0 N, 7.90 mm, 220.0 N, 6.10 mm).
const POSITION_1_BASE: i64 = 180;
const FORCE_LOWER_BASE: i64 = 250;
const POSITION_2_BASE: i64 = 790;
const FORCE_UPPER_BASE: i64 = 2200;
const TRAVEL_AT_UPPER_BASE: i64 = 610;

/// Codes injected on error cycles.
const INJECTED_CODES: [i32; 3] = [11, 12, 13];

/// Stateful source of synthetic frames.
#[derive(Debug)]
pub struct FrameGenerator {
    rng: StdRng,
    cycle: u64,
    error_every: u64,
    end_after: Option<u64>,
    finished: bool,
}

impl FrameGenerator {
    /// `seed` makes output reproducible; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            cycle: 0,
            error_every: 0,
            end_after: None,
            finished: false,
        }
    }

    /// Inject an error code on every `every`-th cycle (0 disables).
    pub fn with_error_every(mut self, every: u64) -> Self {
        self.error_every = every;
        self
    }

    /// Emit `END` on cycle `cycle` and stop afterwards. A cycle that has
    /// already been generated (including 0) finishes the generator at once.
    pub fn with_end_after(mut self, cycle: u64) -> Self {
        self.end_after = Some(cycle);
        if cycle <= self.cycle {
            self.finished = true;
        }
        self
    }

    /// Cycles generated so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Whether the END frame has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next frame, or `None` once an END frame has been produced.
    pub fn next_frame(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        self.cycle += 1;
        let cycle = self.cycle;

        let position_1 = POSITION_1_BASE + self.rng.gen_range(-5..=5);
        let force_lower = FORCE_LOWER_BASE + self.rng.gen_range(-30..=30);
        let travel_1: i64 = self.rng.gen_range(-3..=3);
        let position_2 = POSITION_2_BASE + self.rng.gen_range(-10..=10);
        let force_upper = FORCE_UPPER_BASE + self.rng.gen_range(-100..=100);
        let travel_2: i64 = self.rng.gen_range(-5..=5);
        let travel_at_upper = TRAVEL_AT_UPPER_BASE + self.rng.gen_range(-8..=8);

        let error_code = if self.error_every > 0 && cycle % self.error_every == 0 {
            INJECTED_CODES.choose(&mut self.rng).copied().unwrap_or(0)
        } else {
            0
        };

        let status = if self.end_after == Some(cycle) {
            self.finished = true;
            STATUS_END
        } else {
            STATUS_ACTIVE
        };

        Some(format!(
            "{status};{cycle};{position_1};{force_lower};{travel_1};{position_2};\
             {force_upper};{travel_2};{travel_at_upper};{error_code};!"
        ))
    }
}

/// A finite test run of `cycles` frames, the last one `END`. Empty for 0.
pub fn generate_frames(cycles: u64, with_errors: bool, seed: Option<u64>) -> Vec<String> {
    if cycles == 0 {
        return Vec::new();
    }
    let mut generator = FrameGenerator::new(seed)
        .with_error_every(if with_errors { 20 } else { 0 })
        .with_end_after(cycles);
    std::iter::from_fn(|| generator.next_frame()).collect()
}

/// Outcome of decoding and validating a batch of frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckSummary {
    /// Non-blank lines seen
    pub total: usize,
    /// Lines that decoded and validated
    pub valid: usize,
    /// Lines that did not decode
    pub decode_failures: usize,
    /// Lines that decoded but failed validation
    pub validation_failures: usize,
    /// `(line number, message)` for every rejected line
    pub problems: Vec<(usize, String)>,
}

impl CheckSummary {
    /// Valid frames as a percentage of all frames; 0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.valid as f64 / self.total as f64 * 100.0
    }
}

/// Decode and validate every non-blank line.
pub fn check_frames<'a, I>(lines: I) -> CheckSummary
where
    I: IntoIterator<Item = &'a str>,
{
    let decoder = FrameDecoder::new();
    let validator = RecordValidator::new();
    let mut summary = CheckSummary::default();

    for (index, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        summary.total += 1;
        let line_no = index + 1;
        match decoder.decode(line) {
            Err(err) => {
                summary.decode_failures += 1;
                summary.problems.push((line_no, format!("decode failed: {err}")));
            }
            Ok(record) => match validator.validate(&record) {
                Ok(()) => summary.valid += 1,
                Err(failure) => {
                    summary.validation_failures += 1;
                    summary
                        .problems
                        .push((line_no, format!("validation failed: {failure}")));
                }
            },
        }
    }
    summary
}
