//! Verification phases used to exercise the scheduler's failure handling.

use std::time::Duration;

use invariant_scan::graph::Graph;
use invariant_scan::phases::{UnitMetadata, VerificationPhase};
use invariant_scan::sink::Violation;

/// Panics on units whose name contains `trigger` and passes the rest.
pub struct PanickingPhase {
    pub trigger: &'static str,
}

impl VerificationPhase for PanickingPhase {
    fn name(&self) -> &str {
        "panicking"
    }

    fn check(&self, _graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation> {
        let name = meta.qualified_name();
        if name.contains(self.trigger) {
            panic!("phase blew up on {}", name);
        }
        Vec::new()
    }
}

/// Sleeps for `delay` on every unit.
pub struct SlowPhase {
    pub delay: Duration,
}

impl VerificationPhase for SlowPhase {
    fn name(&self) -> &str {
        "slow"
    }

    fn check(&self, _graph: &Graph, _meta: &UnitMetadata<'_>) -> Vec<Violation> {
        std::thread::sleep(self.delay);
        Vec::new()
    }
}
