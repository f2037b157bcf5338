//! Identity comparison check.
//!
//! Instances of some types can be equal without being the same object, so
//! comparing them with `==` is a latent bug. This phase flags every reference
//! comparison whose operands are both known to be of such a type.

use invariant_scan_graph::{Graph, NodeId, NodeKind};
use serde::{Deserialize, Serialize};

use crate::phases::{UnitMetadata, VerificationPhase};
use crate::sink::Violation;

/// How to treat a comparison against a constant static field of the
/// sensitive type, e.g. `if (kind == Kind.ILLEGAL)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelPolicy {
    /// Report it like any other identity comparison.
    #[default]
    Flag,
    /// Accept it; the constant is used as a unique sentinel.
    Exempt,
}

#[derive(Debug, Clone)]
pub struct IdentityComparisonCheck {
    sensitive_types: Vec<String>,
    sentinel_policy: SentinelPolicy,
}

impl IdentityComparisonCheck {
    pub const NAME: &'static str = "identity-comparison";

    pub fn new<I, S>(sensitive_types: I, sentinel_policy: SentinelPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive_types: sensitive_types.into_iter().map(Into::into).collect(),
            sentinel_policy,
        }
    }

    /// First configured type both operands are assignable to.
    fn shared_sensitive_type(&self, graph: &Graph, x: NodeId, y: NodeId, meta: &UnitMetadata<'_>) -> Option<&str> {
        let (sx, sy) = (graph.stamp(x), graph.stamp(y));
        self.sensitive_types
            .iter()
            .find(|ty| sx.is_assignable_to(ty, meta.hierarchy) && sy.is_assignable_to(ty, meta.hierarchy))
            .map(String::as_str)
    }

    fn is_sentinel(graph: &Graph, id: NodeId) -> bool {
        matches!(&graph.node(id).kind, NodeKind::LoadStatic(field) if field.is_constant)
    }

    /// `equals` of the sensitive type itself has to compare by identity.
    fn is_own_equals(ty: &str, meta: &UnitMetadata<'_>) -> bool {
        meta.unit.name == "equals" && meta.hierarchy.is_subtype(&meta.unit.holder, ty)
    }
}

impl VerificationPhase for IdentityComparisonCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn marker_sensitive(&self) -> bool {
        true
    }

    fn check(&self, graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation> {
        if meta.is_excluded() {
            return Vec::new();
        }
        let unit = meta.qualified_name();
        let mut violations = Vec::new();

        for (_, node) in graph.nodes_where(|k| matches!(k, NodeKind::ObjectEquals)) {
            let [x, y] = node.inputs[..] else { continue };
            // Comparing with null is always correct.
            if graph.is_null_constant(x) || graph.is_null_constant(y) {
                continue;
            }
            let Some(ty) = self.shared_sensitive_type(graph, x, y, meta) else {
                continue;
            };
            if self.sentinel_policy == SentinelPolicy::Exempt
                && (Self::is_sentinel(graph, x) || Self::is_sentinel(graph, y))
            {
                continue;
            }
            if Self::is_own_equals(ty, meta) {
                continue;
            }

            let at = node
                .position
                .map(|p| format!(" at {}", p))
                .unwrap_or_default();
            violations.push(Violation::error(
                unit.clone(),
                Self::NAME,
                format!(
                    "{}{}: {} compared by identity; use equals() instead",
                    unit, at, ty
                ),
            ));
        }
        violations
    }
}
