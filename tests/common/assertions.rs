//! Custom assertion utilities for tests.

use invariant_scan::sink::{Findings, Violation};

/// Assert that exactly one violation was found and that it names `unit`.
pub fn assert_single_violation<'a>(findings: &'a Findings, unit: &str) -> &'a Violation {
    assert_eq!(
        findings.violations.len(),
        1,
        "expected exactly one violation, got: {:#?}",
        findings.violations
    );
    let violation = &findings.violations[0];
    assert_eq!(violation.unit, unit, "violation names the wrong unit: {}", violation);
    violation
}

/// Assert that an error message contains expected text.
///
/// # Panics
///
/// Panics if the error message doesn't contain the expected text.
pub fn assert_error_contains<E: std::fmt::Display>(error: &E, expected_text: &str) {
    let message = error.to_string();
    assert!(
        message.contains(expected_text),
        "error should contain '{}' but was: {}",
        expected_text,
        message
    );
}
