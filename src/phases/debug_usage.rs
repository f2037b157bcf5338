//! Diagnostic output usage check.
//!
//! Calls to the debug logging entry points take a format template and
//! arguments that are only formatted when the output is enabled. A template
//! computed at runtime, or an argument already turned into a string, pays the
//! formatting cost on every call.

use invariant_scan_graph::{Graph, NodeId, NodeKind};
use invariant_scan_types::MethodRef;
use serde::{Deserialize, Serialize};

use crate::phases::{UnitMetadata, VerificationPhase};
use crate::sink::Violation;

/// Shape of a diagnostic output call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCall {
    pub owner: String,
    pub methods: Vec<String>,
    /// Index of the format template among the explicit arguments.
    #[serde(default)]
    pub template_arg: usize,
}

impl DiagnosticCall {
    fn matches(&self, method: &MethodRef) -> bool {
        self.methods.iter().any(|m| method.matches(&self.owner, m))
    }
}

#[derive(Debug, Clone)]
pub struct DebugUsageCheck {
    calls: Vec<DiagnosticCall>,
    eager_formatting_methods: Vec<String>,
}

impl DebugUsageCheck {
    pub const NAME: &'static str = "debug-usage";

    pub fn new(calls: Vec<DiagnosticCall>, eager_formatting_methods: Vec<String>) -> Self {
        Self {
            calls,
            eager_formatting_methods,
        }
    }

    fn eager_formatter<'g>(&self, graph: &'g Graph, arg: NodeId) -> Option<&'g MethodRef> {
        match &graph.node(arg).kind {
            NodeKind::Invoke(m) if self.eager_formatting_methods.contains(&m.name) => Some(m),
            _ => None,
        }
    }
}

impl VerificationPhase for DebugUsageCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check(&self, graph: &Graph, meta: &UnitMetadata<'_>) -> Vec<Violation> {
        let unit = meta.qualified_name();
        let mut violations = Vec::new();

        for (_, node) in graph.nodes_where(|k| matches!(k, NodeKind::Invoke(_))) {
            let NodeKind::Invoke(method) = &node.kind else {
                continue;
            };
            let Some(call) = self.calls.iter().find(|c| c.matches(method)) else {
                continue;
            };
            let receiver = usize::from(!method.is_static);
            let args = node.inputs.get(receiver..).unwrap_or_default();
            let at = node.position.map(|p| p.to_string()).unwrap_or_else(|| "?".into());

            if let Some(&template) = args.get(call.template_arg) {
                if !graph.is_constant(template) {
                    violations.push(Violation::error(
                        unit.clone(),
                        Self::NAME,
                        format!(
                            "{}: argument {} of {} at {} must be a literal format template",
                            unit, call.template_arg, method, at
                        ),
                    ));
                }
            }
            for (index, &arg) in args.iter().enumerate().skip(call.template_arg + 1) {
                if let Some(formatter) = self.eager_formatter(graph, arg) {
                    violations.push(Violation::warning(
                        unit.clone(),
                        Self::NAME,
                        format!(
                            "{}: argument {} of {} at {} is formatted eagerly by {}.{}()",
                            unit, index, method, at, formatter.owner, formatter.name
                        ),
                    ));
                }
            }
        }
        violations
    }
}
