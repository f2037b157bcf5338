//! # Verification Phases
//!
//! A phase is a named, stateless check over one built graph. Every phase in
//! a [`PhaseRegistry`] is applied to every graph, except that phases marked
//! as marker-sensitive are skipped for units that carry the exclusion marker.
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌─────────────────────────┐
//! │ GraphBuilder │──▶│ Graph (owned) │──▶│ phase.check(&g, &meta)  │──▶ ViolationSink
//! └──────────────┘   └───────────────┘   │   (each phase, any order)│
//!                                        └─────────────────────────┘
//! ```
//!
//! Phases only read the graph and never see each other's results, so the
//! order of the registry does not change the set of findings.
//!
//! ## Adding a phase
//!
//! Implement [`VerificationPhase`] and register it. The scheduler and sink
//! need no changes.

pub mod debug_usage;
pub mod identity;

use anyhow::{bail, Result};
use invariant_scan_graph::Graph;
use invariant_scan_types::{TypeHierarchy, UnitDescriptor};

use crate::sink::Violation;

pub use debug_usage::{DebugUsageCheck, DiagnosticCall};
pub use identity::{IdentityComparisonCheck, SentinelPolicy};

/// What a phase may know about the unit besides its graph.
#[derive(Debug, Clone, Copy)]
pub struct UnitMetadata<'a> {
    pub unit: &'a UnitDescriptor,
    pub hierarchy: &'a TypeHierarchy,
}

impl<'a> UnitMetadata<'a> {
    pub fn new(unit: &'a UnitDescriptor, hierarchy: &'a TypeHierarchy) -> Self {
        Self { unit, hierarchy }
    }

    pub fn qualified_name(&self) -> String {
        self.unit.qualified_name()
    }

    pub fn is_excluded(&self) -> bool {
        self.unit.flags.has_exclusion_marker
    }
}

/// A single, independent check over a graph.
pub trait VerificationPhase: Send + Sync {
    /// Unique name, used in reports and to reject duplicate registration.
    fn name(&self) -> &str;

    /// Skip this phase for units carrying the exclusion marker.
    fn marker_sensitive(&self) -> bool {
        false
    }

    fn check(&self, graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation>;
}

/// The set of phases applied to every built graph.
#[derive(Default)]
pub struct PhaseRegistry {
    phases: Vec<Box<dyn VerificationPhase>>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phase. Fails if a phase with the same name is already present.
    pub fn register(&mut self, phase: Box<dyn VerificationPhase>) -> Result<()> {
        if self.phases.iter().any(|p| p.name() == phase.name()) {
            bail!("verification phase '{}' registered twice", phase.name());
        }
        self.phases.push(phase);
        Ok(())
    }

    pub fn with_phase(mut self, phase: impl VerificationPhase + 'static) -> Result<Self> {
        self.register(Box::new(phase))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Phases to run for the given unit.
    pub fn applicable<'s>(
        &'s self,
        meta: &UnitMetadata<'_>,
    ) -> impl Iterator<Item = &'s dyn VerificationPhase> + 's {
        let excluded = meta.is_excluded();
        self.phases
            .iter()
            .map(|p| p.as_ref())
            .filter(move |p| !(excluded && p.marker_sensitive()))
    }

    /// Run every applicable phase over `graph`.
    pub fn check_all(&self, graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation> {
        self.applicable(meta)
            .flat_map(|phase| phase.check(graph, meta))
            .collect()
    }
}

impl std::fmt::Debug for PhaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRegistry")
            .field("phases", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invariant_scan_graph::{BuilderOptions, GraphBuilder};
    use invariant_scan_types::{Insn, Signature, TypeRef, UnitFlags};

    struct Named(&'static str, bool);

    impl VerificationPhase for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn marker_sensitive(&self) -> bool {
            self.1
        }
        fn check(&self, _graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation> {
            vec![Violation::error(meta.qualified_name(), self.0, "hit")]
        }
    }

    fn unit(excluded: bool) -> UnitDescriptor {
        UnitDescriptor {
            holder: "Acme.Foo".into(),
            name: "bar".into(),
            signature: Signature::new(vec![], TypeRef::Void, true),
            body: vec![Insn::Return],
            flags: UnitFlags {
                has_exclusion_marker: excluded,
                ..UnitFlags::default()
            },
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let registry = PhaseRegistry::new().with_phase(Named("a", false)).unwrap();
        let err = registry.with_phase(Named("a", true)).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_marker_sensitive_phases_skipped_for_excluded_units() {
        let registry = PhaseRegistry::new()
            .with_phase(Named("always", false))
            .unwrap()
            .with_phase(Named("sensitive", true))
            .unwrap();
        let h = TypeHierarchy::new();

        let plain = unit(false);
        let graph = GraphBuilder::new(&h, BuilderOptions::default())
            .build(&plain)
            .unwrap();
        let found = registry.check_all(&graph, &UnitMetadata::new(&plain, &h));
        assert_eq!(found.len(), 2);

        let excluded = unit(true);
        let found = registry.check_all(&graph, &UnitMetadata::new(&excluded, &h));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].phase, "always");
    }
}
