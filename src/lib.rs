//! Static invariant scanner for compiled program units.
//!
//! Units are read from `*.units.json` artifacts into a [`catalog`], turned into
//! graphs by `invariant_scan_graph`, and checked by the [`phases`] of a
//! registry on a pool of workers ([`scheduler`]). Findings land in a
//! [`sink`] and are summarized by [`report`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use invariant_scan::{catalog, config::ScanConfig, report::Reporter, scheduler};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ScanConfig::default();
//! let catalog = catalog::load_artifacts(&["build/units".into()], &config.exclusion_marker)?;
//! let scheduler = scheduler::Scheduler::new(config.scheduler_options())?;
//! let findings = scheduler.run(scheduler::ScanRequest {
//!     catalog: Arc::new(catalog),
//!     phases: Arc::new(config.phase_registry()?),
//!     class_check: config.class_check(),
//!     filters: config.filters.clone(),
//!     builder: config.builder_options(),
//! })?;
//! println!("{}", Reporter::summarize(&findings).report());
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod catalog;
pub mod class_check;
pub mod config;
pub mod phases;
pub mod report;
pub mod scheduler;
pub mod signal;
pub mod sink;

pub use invariant_scan_graph as graph;
pub use invariant_scan_types as types;
