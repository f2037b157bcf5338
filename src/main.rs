//! `invariant-scan`: verify compiled units against code invariants.
//!
//! Exit codes: `0` no findings, `1` violations or fatal scan errors, `2` the
//! run was aborted (bad arguments, configuration fault, timeout, SIGINT or
//! SIGTERM).
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use invariant_scan::args::Args;
use invariant_scan::catalog::load_artifacts;
use invariant_scan::config::ScanConfig;
use invariant_scan::report::{Outcome, Reporter};
use invariant_scan::scheduler::{ScanRequest, Scheduler};
use invariant_scan::signal::cancel_on_shutdown_signal;
use invariant_scan::sink::Findings;

const EXIT_FAIL: u8 = 1;
const EXIT_ABORTED: u8 = 2;

#[derive(Serialize)]
struct JsonSummary<'a> {
    passed: bool,
    units_built: usize,
    bailouts_suppressed: usize,
    linkage_suppressed: usize,
    violations: &'a [invariant_scan::sink::Violation],
    errors: &'a [invariant_scan::sink::ScanError],
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(msg) = args.validate() {
        eprintln!("error: {}", msg);
        return ExitCode::from(EXIT_ABORTED);
    }

    match run(&args) {
        Ok(outcome) if outcome.passed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_FAIL),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays clean. `RUST_LOG`
/// wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<Outcome> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    args.apply_to(&mut config);
    config.validate()?;

    let scheduler = Scheduler::new(config.scheduler_options())?;
    cancel_on_shutdown_signal(scheduler.cancel_token()).context("install signal handler")?;

    let catalog = load_artifacts(&args.artifacts, &config.exclusion_marker)
        .context("load unit artifacts")?;
    let phases = config.phase_registry()?;
    info!(phases = ?phases.names(), filters = ?config.filters, "configured");

    let findings = scheduler.run(ScanRequest {
        catalog: Arc::new(catalog),
        phases: Arc::new(phases),
        class_check: config.class_check(),
        filters: config.filters.clone(),
        builder: config.builder_options(),
    })?;

    let outcome = Reporter::summarize(&findings);
    let text = if args.verbose > 0 {
        outcome.verbose_report()
    } else {
        outcome.report()
    };
    if !text.is_empty() {
        eprintln!("{}", text);
    }
    if !outcome.passed {
        warn!(
            violations = findings.violations.len(),
            fatal_errors = findings.fatal_errors().count(),
            "invariants violated"
        );
    }
    if args.json {
        print_json(&outcome, &findings)?;
    }
    Ok(outcome)
}

fn print_json(outcome: &Outcome, findings: &Findings) -> Result<()> {
    let summary = JsonSummary {
        passed: outcome.passed,
        units_built: findings.units_built,
        bailouts_suppressed: findings.bailouts_suppressed,
        linkage_suppressed: findings.linkage_suppressed,
        violations: &findings.violations,
        errors: &findings.errors,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
