use clap::Parser;
use std::path::PathBuf;

use crate::config::ScanConfig;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Unit artifacts (`*.units.json`) or directories searched recursively for them.
    #[arg(value_name = "ARTIFACT", required = true)]
    pub artifacts: Vec<PathBuf>,

    /// Only scan units whose qualified name contains one of these substrings.
    #[arg(long, env = "INVARIANT_SCAN_FILTERS", value_delimiter = ',', value_name = "SUBSTR")]
    pub filters: Vec<String>,

    /// Type that must not be compared by identity. Can be provided multiple times;
    /// replaces the configured list.
    #[arg(long = "sensitive-type", value_name = "TYPE")]
    pub sensitive_types: Vec<String>,

    /// JSON config file; unset fields keep their defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Worker threads (default: available parallelism).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Time bound in seconds, applied separately to submitting units and to waiting for
    /// the submitted tasks to finish, so a run may take up to twice this long.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Treat references to unknown types as linkage errors while building graphs.
    #[arg(long, default_value_t = false)]
    pub eager_resolution: bool,

    /// Print a JSON summary of the findings to stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Validate CLI arguments for conflicts and requirements.
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("--workers must be at least 1".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("--timeout-secs must be at least 1".to_string());
        }
        if self.filters.iter().any(|f| f.trim().is_empty()) {
            return Err("--filters must not contain empty entries".to_string());
        }
        Ok(())
    }

    /// Layer the flags that were given over `config`.
    pub fn apply_to(&self, config: &mut ScanConfig) {
        if !self.filters.is_empty() {
            config.filters = self.filters.iter().map(|f| f.trim().to_string()).collect();
        }
        if !self.sensitive_types.is_empty() {
            config.sensitive_types = self.sensitive_types.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if self.eager_resolution {
            config.eager_resolution = true;
        }
    }
}
