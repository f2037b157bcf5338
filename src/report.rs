//! Pass/fail outcome and report text.

use serde::Serialize;

use crate::sink::Findings;

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub passed: bool,
    /// Violations, then fatal errors, each in collection order.
    pub lines: Vec<String>,
    /// Units skipped because their body could not be built. Never affects
    /// `passed`.
    pub skipped: Vec<String>,
}

impl Outcome {
    /// The report text: one finding per line.
    pub fn report(&self) -> String {
        self.lines.join("\n")
    }

    /// Report text followed by the skipped units.
    pub fn verbose_report(&self) -> String {
        if self.skipped.is_empty() {
            return self.report();
        }
        let mut out = self.report();
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("skipped {} unit(s):", self.skipped.len()));
        for line in &self.skipped {
            out.push_str("\n  ");
            out.push_str(line);
        }
        out
    }
}

/// Turns findings into an [`Outcome`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter;

impl Reporter {
    pub fn summarize(findings: &Findings) -> Outcome {
        let mut lines: Vec<String> = findings.violations.iter().map(|v| v.to_string()).collect();
        lines.extend(findings.fatal_errors().map(|e| e.to_string()));
        let skipped = findings.skipped().map(|e| e.to_string()).collect();

        Outcome {
            passed: findings.violations.is_empty() && findings.fatal_errors().next().is_none(),
            lines,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ErrorCategory, ScanError, Violation};

    #[test]
    fn test_pass_with_only_build_errors() {
        let findings = Findings {
            errors: vec![ScanError::new("A.bad", ErrorCategory::Build, "malformed body: empty body")],
            ..Findings::default()
        };
        let outcome = Reporter::summarize(&findings);
        assert!(outcome.passed);
        assert!(outcome.report().is_empty());
        assert!(outcome.verbose_report().contains("A.bad"));
    }

    #[test]
    fn test_lines_keep_order_violations_first() {
        let findings = Findings {
            violations: vec![
                Violation::error("A.x", "p", "first"),
                Violation::error("A.y", "p", "second"),
            ],
            errors: vec![
                ScanError::new("A.z", ErrorCategory::Unexpected, "boom"),
                ScanError::new("A.w", ErrorCategory::Build, "skipped"),
            ],
            ..Findings::default()
        };
        let outcome = Reporter::summarize(&findings);
        assert!(!outcome.passed);
        assert_eq!(
            outcome.report(),
            "[p] first\n[p] second\nunexpected error in A.z: boom"
        );
    }

    #[test]
    fn test_fatal_error_alone_fails() {
        let findings = Findings {
            errors: vec![ScanError::new("T", ErrorCategory::Unexpected, "panic")],
            ..Findings::default()
        };
        assert!(!Reporter::summarize(&findings).passed);
    }
}
