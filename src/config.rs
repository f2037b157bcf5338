//! Scan configuration.
//!
//! Every field has a default, so a config file only names what it changes.
//! CLI flags are applied on top by [`crate::args::Args::apply_to`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use invariant_scan_graph::BuilderOptions;

use crate::class_check::{ClassCheckMode, ClassLevelCheck};
use crate::phases::{
    DebugUsageCheck, DiagnosticCall, IdentityComparisonCheck, PhaseRegistry, SentinelPolicy,
};
use crate::scheduler::{available_workers, SchedulerOptions};

const DEFAULT_SENSITIVE_TYPES: &[&str] = &[
    "Value",
    "Register",
    "RegisterCategory",
    "JavaType",
    "JavaMethod",
    "JavaField",
    "LocationIdentity",
    "LIRKind",
    "ArithmeticOpTable",
    "ArithmeticOpTable.Op",
];

pub const DEFAULT_EXCLUSION_MARKER: &str = "ExcludeFromIdentityComparisonVerification";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassCheckConfig {
    pub enabled: bool,
    pub family_root: String,
    pub required_annotation: String,
    pub mode: ClassCheckMode,
}

impl Default for ClassCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            family_root: "Node".to_string(),
            required_annotation: "NodeInfo".to_string(),
            mode: ClassCheckMode::Violation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Types that must be compared with `equals()`, not by identity.
    pub sensitive_types: Vec<String>,
    /// Method annotation that exempts a unit from the identity check.
    pub exclusion_marker: String,
    pub sentinel_policy: SentinelPolicy,
    pub diagnostic_calls: Vec<DiagnosticCall>,
    /// Method names that format their receiver into a string.
    pub eager_formatting_methods: Vec<String>,
    pub class_check: ClassCheckConfig,
    /// Substrings selecting units by qualified name.
    pub filters: Vec<String>,
    /// Worker threads; `0` uses the available parallelism.
    pub workers: usize,
    /// Submitted-but-unfinished task bound; `0` uses four per worker.
    pub queue_capacity: usize,
    pub timeout_secs: u64,
    pub eager_resolution: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sensitive_types: DEFAULT_SENSITIVE_TYPES.iter().map(|s| s.to_string()).collect(),
            exclusion_marker: DEFAULT_EXCLUSION_MARKER.to_string(),
            sentinel_policy: SentinelPolicy::default(),
            diagnostic_calls: vec![DiagnosticCall {
                owner: "Debug".to_string(),
                methods: vec!["log".to_string(), "dump".to_string()],
                template_arg: 0,
            }],
            eager_formatting_methods: vec!["toString".to_string()],
            class_check: ClassCheckConfig::default(),
            filters: Vec::new(),
            workers: 0,
            queue_capacity: 0,
            timeout_secs: 60 * 60,
            eager_resolution: false,
        }
    }
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Reject values no run can succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if self.exclusion_marker.trim().is_empty() {
            bail!("exclusion_marker must not be empty");
        }
        if self.filters.iter().any(|f| f.is_empty()) {
            bail!("filters must not contain empty entries");
        }
        Ok(())
    }

    /// Phases applied to every built graph.
    pub fn phase_registry(&self) -> Result<PhaseRegistry> {
        let mut registry = PhaseRegistry::new();
        if !self.sensitive_types.is_empty() {
            registry.register(Box::new(IdentityComparisonCheck::new(
                self.sensitive_types.iter().cloned(),
                self.sentinel_policy,
            )))?;
        }
        if !self.diagnostic_calls.is_empty() {
            registry.register(Box::new(DebugUsageCheck::new(
                self.diagnostic_calls.clone(),
                self.eager_formatting_methods.clone(),
            )))?;
        }
        Ok(registry)
    }

    pub fn class_check(&self) -> Option<ClassLevelCheck> {
        let c = &self.class_check;
        c.enabled.then(|| {
            ClassLevelCheck::new(c.family_root.clone(), c.required_annotation.clone(), c.mode)
        })
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        let workers = if self.workers == 0 {
            available_workers()
        } else {
            self.workers
        };
        let mut options = SchedulerOptions::with_workers(workers);
        if self.queue_capacity > 0 {
            options.queue_capacity = self.queue_capacity;
        }
        options.max_wait = Duration::from_secs(self.timeout_secs);
        options
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            eager_resolution: self.eager_resolution,
        }
    }
}
