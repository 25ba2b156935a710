//! Instrument error code table.
//!
//! The fatigue tester reports a numeric error code in the last data field of
//! every frame. Codes are grouped by range:
//!
//! - `10..=14`: test and force-limit violations
//! - `101..=107`: voice coil motor / drive errors
//! - `201..=205`: travel determination and force search errors
//!
//! Lookups are total: unknown codes render as `Unknown Error Code: <N>`.

use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashMap;

/// The only code meaning "no error".
pub const NO_ERROR: i32 = 0;

static ERROR_TABLE: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (NO_ERROR, "No Error: Everything is OK"),
        (10, "Test failed: The test was completed with an error"),
        (
            11,
            "Additional Path 1 Violation: Additional path 1 has exceeded the permissible tolerance",
        ),
        (
            12,
            "Additional Path 2 Violation: Additional path 2 has exceeded the permissible tolerance",
        ),
        (
            13,
            "Force Limit 2 Violation: Force 2 fell below the permissible limit",
        ),
        (
            14,
            "Force Limit 2 Violation: Force 2 exceeded the permissible limit",
        ),
        (
            101,
            "Motor Error: The Voice Coil drive could not be initialized",
        ),
        (
            102,
            "Motor Error: Communication error with the Voice Coil drive",
        ),
        (
            103,
            "Reference Position: No reference position was set using the Zero Point button",
        ),
        (104, "Motor Error: The Voice Coil drive is not ready"),
        (
            106,
            "Motor Error: The Voice Coil drive was not initialized correctly",
        ),
        (107, "Motor Error: The Voice Coil drive is blocked"),
        (
            201,
            "Travel Determination: The determined resulting actuation travel is too small",
        ),
        (
            202,
            "Force Search: At the starting point of force search run 1, the specified target force 1 had already been reached",
        ),
        (
            203,
            "Force Search: At the starting point of force search run 2, the specified target force 2 had already been reached",
        ),
        (
            204,
            "Force Search: Target force 1 could not be built up during the force search",
        ),
        (
            205,
            "Force Search: Target force 2 could not be built up during the force search",
        ),
    ])
});

/// Describe an error code. Never fails.
pub fn describe(code: i32) -> Cow<'static, str> {
    match ERROR_TABLE.get(&code) {
        Some(text) => Cow::Borrowed(*text),
        None => Cow::Owned(format!("Unknown Error Code: {code}")),
    }
}

/// Whether the code appears in the table.
pub fn is_known(code: i32) -> bool {
    ERROR_TABLE.contains_key(&code)
}

/// All known codes in ascending order.
pub fn known_codes() -> Vec<i32> {
    let mut codes: Vec<i32> = ERROR_TABLE.keys().copied().collect();
    codes.sort_unstable();
    codes
}
