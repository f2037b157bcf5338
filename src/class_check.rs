//! Graph-free check run once per declared type.

use invariant_scan_types::TypeHierarchy;
use serde::{Deserialize, Serialize};

use crate::sink::{ErrorCategory, ScanError, Violation, ViolationSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassCheckMode {
    /// Report a missing annotation as a violation.
    #[default]
    Violation,
    /// Report it as an unexpected error.
    Fatal,
}

/// Every member of a type family must carry a metadata annotation.
#[derive(Debug, Clone)]
pub struct ClassLevelCheck {
    pub family_root: String,
    pub required_annotation: String,
    pub mode: ClassCheckMode,
}

impl ClassLevelCheck {
    pub const NAME: &'static str = "class-annotation";

    pub fn new(
        family_root: impl Into<String>,
        required_annotation: impl Into<String>,
        mode: ClassCheckMode,
    ) -> Self {
        Self {
            family_root: family_root.into(),
            required_annotation: required_annotation.into(),
            mode,
        }
    }

    /// Check one declared type and record any finding.
    pub fn check_type(&self, type_name: &str, hierarchy: &TypeHierarchy, sink: &ViolationSink) {
        if !hierarchy.is_subtype(type_name, &self.family_root)
            || hierarchy.has_annotation(type_name, &self.required_annotation)
        {
            return;
        }
        let message = format!(
            "{} is a {} but is not annotated with {}",
            type_name, self.family_root, self.required_annotation
        );
        match self.mode {
            ClassCheckMode::Violation => {
                sink.record_violation(Violation::error(type_name, Self::NAME, message))
            }
            ClassCheckMode::Fatal => {
                sink.record_error(ScanError::new(type_name, ErrorCategory::Unexpected, message))
            }
        }
    }
}
