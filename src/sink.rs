//! Thread-safe aggregation of scan findings.
//!
//! Worker tasks append [`Violation`]s and [`ScanError`]s concurrently; the
//! scheduler drains the sink into [`Findings`] once every task has finished.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How a violation is labelled in the report. Both severities fail a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    /// Wasted work rather than wrong behavior.
    Warning,
}

/// A broken invariant found in a unit or type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Violation {
    /// Qualified unit name, or the type name for class-level findings.
    pub unit: String,
    /// Name of the phase or check that produced the finding.
    pub phase: String,
    pub message: String,
    pub severity: Severity,
}

impl Violation {
    pub fn error(
        unit: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            phase: phase.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(
        unit: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(unit, phase, message)
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "[{}] {}", self.phase, self.message),
            Severity::Warning => write!(f, "[{}] warning: {}", self.phase, self.message),
        }
    }
}

/// Why a unit or type could not be analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The unit body could not be turned into a graph; the unit is skipped.
    Build,
    /// Anything else that went wrong inside a task, including panics.
    Unexpected,
    /// The run was cancelled or exceeded its time bound.
    Interrupted,
    /// The run was misconfigured.
    Configuration,
}

impl ErrorCategory {
    /// Fatal categories fail the run on their own.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCategory::Build)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Build => "build",
            ErrorCategory::Unexpected => "unexpected",
            ErrorCategory::Interrupted => "interrupted",
            ErrorCategory::Configuration => "configuration",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScanError {
    /// Unit, type or artifact the error is about.
    pub subject: String,
    pub category: ErrorCategory,
    pub detail: String,
}

impl ScanError {
    pub fn new(subject: impl Into<String>, category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            category,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error in {}: {}", self.category, self.subject, self.detail)
    }
}

/// Everything a completed run collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Findings {
    pub violations: Vec<Violation>,
    pub errors: Vec<ScanError>,
    /// Units whose graph was built and verified.
    pub units_built: usize,
    pub bailouts_suppressed: usize,
    pub linkage_suppressed: usize,
}

impl Findings {
    pub fn fatal_errors(&self) -> impl Iterator<Item = &ScanError> {
        self.errors.iter().filter(|e| e.category.is_fatal())
    }

    /// Units skipped because their body could not be built.
    pub fn skipped(&self) -> impl Iterator<Item = &ScanError> {
        self.errors
            .iter()
            .filter(|e| e.category == ErrorCategory::Build)
    }
}

/// Append-only collector shared by every task of a run.
#[derive(Debug, Default)]
pub struct ViolationSink {
    violations: Mutex<Vec<Violation>>,
    errors: Mutex<Vec<ScanError>>,
    units_built: AtomicUsize,
    bailouts: AtomicUsize,
    linkage: AtomicUsize,
}

impl ViolationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_violation(&self, violation: Violation) {
        self.violations.lock().push(violation);
    }

    pub fn record_violations(&self, violations: Vec<Violation>) {
        if violations.is_empty() {
            return;
        }
        self.violations.lock().extend(violations);
    }

    pub fn record_error(&self, error: ScanError) {
        self.errors.lock().push(error);
    }

    pub fn note_built(&self) {
        self.units_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_bailout(&self) {
        self.bailouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_linkage(&self) {
        self.linkage.fetch_add(1, Ordering::Relaxed);
    }

    /// Take everything collected so far. Only called once no task can
    /// append any more.
    pub(crate) fn drain(&self) -> Findings {
        Findings {
            violations: std::mem::take(&mut *self.violations.lock()),
            errors: std::mem::take(&mut *self.errors.lock()),
            units_built: self.units_built.swap(0, Ordering::AcqRel),
            bailouts_suppressed: self.bailouts.swap(0, Ordering::AcqRel),
            linkage_suppressed: self.linkage.swap(0, Ordering::AcqRel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let sink = ViolationSink::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let sink = &sink;
                s.spawn(move || {
                    for i in 0..250 {
                        sink.record_violation(Violation::error(
                            format!("T{}.m{}", t, i),
                            "test",
                            "identity comparison",
                        ));
                        if i % 50 == 0 {
                            sink.record_error(ScanError::new(
                                format!("T{}", t),
                                ErrorCategory::Build,
                                "bad body",
                            ));
                        }
                        sink.note_built();
                    }
                });
            }
        });

        let findings = sink.drain();
        assert_eq!(findings.violations.len(), 2000);
        assert_eq!(findings.errors.len(), 40);
        assert_eq!(findings.units_built, 2000);

        let again = sink.drain();
        assert!(again.violations.is_empty());
        assert_eq!(again.units_built, 0);
    }

    #[test]
    fn test_warning_is_labelled() {
        let warning = Violation::warning("A.m", "debug-usage", "formatted eagerly");
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.to_string(), "[debug-usage] warning: formatted eagerly");
        assert_eq!(
            Violation::error("A.m", "p", "msg").to_string(),
            "[p] msg"
        );
    }

    #[test]
    fn test_fatal_categories() {
        assert!(!ErrorCategory::Build.is_fatal());
        assert!(ErrorCategory::Unexpected.is_fatal());
        assert!(ErrorCategory::Interrupted.is_fatal());
        assert!(ErrorCategory::Configuration.is_fatal());

        let findings = Findings {
            errors: vec![
                ScanError::new("A.a", ErrorCategory::Build, "x"),
                ScanError::new("A.b", ErrorCategory::Unexpected, "y"),
            ],
            ..Findings::default()
        };
        assert_eq!(findings.fatal_errors().count(), 1);
        assert_eq!(findings.skipped().count(), 1);
    }
}
