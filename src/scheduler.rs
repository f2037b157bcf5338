//! Concurrent build-and-verify pipeline.
//!
//! The [`Scheduler`] owns a rayon pool for its whole lifetime. A run walks the
//! catalog in order and submits one class-level task per declared type and
//! one build-and-verify task per eligible unit. Submission blocks while
//! `queue_capacity` tasks are in flight; once the catalog is exhausted the run
//! waits for the remaining tasks. Each of the two stages is bounded by
//! `max_wait`.
//!
//! Tasks share nothing mutable except the [`ViolationSink`]. Errors and panics
//! are caught at the task boundary and recorded there, so one unit can never
//! take down its siblings. Only a configuration fault or an interruption
//! ends a run early, and an interrupted run reports nothing.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use invariant_scan_graph::{BuildError, BuilderOptions, GraphBuilder};

use crate::catalog::UnitCatalog;
use crate::class_check::ClassLevelCheck;
use crate::phases::{PhaseRegistry, UnitMetadata};
use crate::sink::{ErrorCategory, Findings, ScanError, ViolationSink};

/// Default bound on the final wait for in-flight tasks.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// How often blocked waits re-check the cancel token.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    /// Maximum number of submitted tasks not yet finished.
    pub queue_capacity: usize,
    pub max_wait: Duration,
}

impl SchedulerOptions {
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * 4,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::with_workers(available_workers())
    }
}

/// Worker count matching the host's available parallelism.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Faults that end a run without a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The run cannot start as configured.
    Configuration(String),
    /// The run was cancelled or did not finish within its time bound.
    Interrupted(InterruptReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    Timeout(Duration),
    Cancelled,
}

impl RunError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RunError::Configuration(_) => ErrorCategory::Configuration,
            RunError::Interrupted(_) => ErrorCategory::Interrupted,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Configuration(msg) => write!(f, "configuration fault: {}", msg),
            RunError::Interrupted(InterruptReason::Timeout(limit)) => write!(
                f,
                "run interrupted: tasks still running after {}s",
                limit.as_secs_f64()
            ),
            RunError::Interrupted(InterruptReason::Cancelled) => {
                write!(f, "run interrupted: cancelled")
            }
        }
    }
}

impl std::error::Error for RunError {}

/// Shared flag that aborts a run at its next wait point.
///
/// In-flight tasks are never interrupted; they finish into a sink nobody
/// reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run needs.
#[derive(Clone)]
pub struct ScanRequest {
    pub catalog: Arc<dyn UnitCatalog>,
    pub phases: Arc<PhaseRegistry>,
    pub class_check: Option<ClassLevelCheck>,
    /// Substrings selecting units by qualified name; empty selects all.
    pub filters: Vec<String>,
    pub builder: BuilderOptions,
}

/// A unit is selected if no filters are set or its name contains one.
pub fn matches_filters(filters: &[String], name: &str) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.contains(f.as_str()))
}

#[derive(Debug)]
pub struct Scheduler {
    pool: rayon::ThreadPool,
    options: SchedulerOptions,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Result<Self, RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("invariant-scan-{}", i))
            .build()
            .map_err(|e| RunError::Configuration(format!("cannot start worker pool: {}", e)))?;
        Ok(Self {
            pool,
            options,
            cancel: CancelToken::new(),
        })
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Token that interrupts this scheduler's runs. Once cancelled, every
    /// later run is interrupted too.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Scan every selected unit of the catalog and collect the findings.
    pub fn run(&self, request: ScanRequest) -> Result<Findings, RunError> {
        let ScanRequest {
            catalog,
            phases,
            class_check,
            filters,
            builder,
        } = request;

        if self.options.max_wait.is_zero() {
            return Err(RunError::Configuration(
                "the maximum wait must be longer than zero".to_string(),
            ));
        }
        if catalog.unit_count() == 0 {
            return Err(RunError::Configuration(
                "the catalog contains no units to analyze".to_string(),
            ));
        }

        let limit = WaitLimit {
            deadline: Instant::now() + self.options.max_wait,
            max_wait: self.options.max_wait,
            cancel: &self.cancel,
        };
        let capacity = self.options.queue_capacity.max(1);
        let sink = Arc::new(ViolationSink::new());
        let in_flight = Arc::new(InFlight::default());
        let class_check = class_check.map(Arc::new);
        let mut submitted = 0usize;
        let mut filtered = 0usize;

        info!(
            types = catalog.types().len(),
            units = catalog.unit_count(),
            phases = phases.len(),
            workers = self.pool.current_num_threads(),
            "starting scan"
        );

        for (type_index, ty) in catalog.types().iter().enumerate() {
            if let Some(check) = &class_check {
                in_flight.acquire(capacity, limit)?;
                let slot = Slot(in_flight.clone());
                let (catalog, check, sink) = (catalog.clone(), check.clone(), sink.clone());
                self.pool.spawn(move || {
                    let _slot = slot;
                    run_class_task(catalog.as_ref(), type_index, &check, &sink);
                });
            }

            for (unit_index, unit) in ty.units.iter().enumerate() {
                if !unit.flags.has_body() {
                    continue;
                }
                if !matches_filters(&filters, &unit.qualified_name()) {
                    filtered += 1;
                    continue;
                }
                in_flight.acquire(capacity, limit)?;
                let slot = Slot(in_flight.clone());
                let (catalog, phases, sink) = (catalog.clone(), phases.clone(), sink.clone());
                self.pool.spawn(move || {
                    let _slot = slot;
                    run_unit_task(catalog.as_ref(), type_index, unit_index, &phases, builder, &sink);
                });
                submitted += 1;
            }
        }

        let limit = WaitLimit {
            deadline: Instant::now() + self.options.max_wait,
            ..limit
        };
        if let Err(err) = in_flight.wait_idle(limit) {
            warn!(%err, "aborting scan, collected findings are discarded");
            return Err(err);
        }

        let findings = sink.drain();
        info!(
            submitted,
            filtered,
            built = findings.units_built,
            violations = findings.violations.len(),
            errors = findings.errors.len(),
            bailouts = findings.bailouts_suppressed,
            linkage = findings.linkage_suppressed,
            "scan complete"
        );
        Ok(findings)
    }
}

// =============================================================================
// Tasks
// =============================================================================

fn run_class_task(catalog: &dyn UnitCatalog, type_index: usize, check: &ClassLevelCheck, sink: &ViolationSink) {
    let name = &catalog.types()[type_index].name;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        check.check_type(name, catalog.hierarchy(), sink)
    }));
    if let Err(payload) = outcome {
        record_panic(name, payload, sink);
    }
}

fn run_unit_task(
    catalog: &dyn UnitCatalog,
    type_index: usize,
    unit_index: usize,
    phases: &PhaseRegistry,
    builder: BuilderOptions,
    sink: &ViolationSink,
) {
    let unit = &catalog.types()[type_index].units[unit_index];
    let name = unit.qualified_name();
    let hierarchy = catalog.hierarchy();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        match GraphBuilder::new(hierarchy, builder).build(unit) {
            Ok(graph) => {
                sink.note_built();
                let violations = phases.check_all(&graph, &UnitMetadata::new(unit, hierarchy));
                debug!(unit = %name, nodes = graph.len(), violations = violations.len(), "verified");
                sink.record_violations(violations);
            }
            Err(err @ BuildError::Bailout { .. }) => {
                debug!(unit = %name, %err, "bailout suppressed");
                sink.note_bailout();
            }
            Err(err @ BuildError::Linkage { .. }) => {
                debug!(unit = %name, %err, "linkage error suppressed");
                sink.note_linkage();
            }
            Err(err) => {
                debug!(unit = %name, %err, "skipping unit");
                sink.record_error(ScanError::new(name.clone(), ErrorCategory::Build, err.to_string()));
            }
        }
    }));
    if let Err(payload) = outcome {
        record_panic(&name, payload, sink);
    }
}

fn record_panic(subject: &str, payload: Box<dyn Any + Send>, sink: &ViolationSink) {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    warn!(subject, %detail, "task panicked");
    sink.record_error(ScanError::new(
        subject,
        ErrorCategory::Unexpected,
        format!("panic while checking: {}", detail),
    ));
}

// =============================================================================
// In-flight accounting
// =============================================================================

/// Time bound and cancel token a run waits under.
#[derive(Debug, Clone, Copy)]
struct WaitLimit<'a> {
    deadline: Instant,
    max_wait: Duration,
    cancel: &'a CancelToken,
}

impl WaitLimit<'_> {
    fn check(&self) -> Result<Duration, RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Interrupted(InterruptReason::Cancelled));
        }
        let now = Instant::now();
        if now >= self.deadline {
            return Err(RunError::Interrupted(InterruptReason::Timeout(self.max_wait)));
        }
        Ok(self.deadline - now)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    changed: Condvar,
}

impl InFlight {
    /// Block until fewer than `capacity` tasks are in flight, then claim a slot.
    fn acquire(&self, capacity: usize, limit: WaitLimit<'_>) -> Result<(), RunError> {
        limit.check()?;
        let mut count = self.count.lock();
        while *count >= capacity {
            self.wait(&mut count, limit)?;
        }
        *count += 1;
        Ok(())
    }

    fn release(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }

    fn wait_idle(&self, limit: WaitLimit<'_>) -> Result<(), RunError> {
        let mut count = self.count.lock();
        while *count > 0 {
            self.wait(&mut count, limit)?;
        }
        Ok(())
    }

    fn wait(&self, count: &mut MutexGuard<'_, usize>, limit: WaitLimit<'_>) -> Result<(), RunError> {
        let remaining = limit.check()?;
        self.changed.wait_for(count, remaining.min(POLL_INTERVAL));
        Ok(())
    }
}

/// Releases its in-flight slot when the task finishes, even by panicking.
struct Slot(Arc<InFlight>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.release();
    }
}
