//! Failures of graph construction.
//!
//! | Variant | Meaning | Reported |
//! |---------|---------|----------|
//! | `Malformed` | the body is not a well-formed unit body | yes, as a skipped unit |
//! | `Bailout` | the body uses a construct outside the analyzable subset | no |
//! | `Linkage` | eager resolution hit a type the hierarchy does not know | no |

use std::fmt;

/// Why a body was rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MalformedReason {
    EmptyBody,
    /// A jump leaves the body.
    InvalidTarget,
    StackUnderflow,
    /// Paths reaching a join point disagree on operand stack depth.
    StackDepthMismatch,
    /// An operand, or a stack slot at a join point, has the wrong kind.
    KindMismatch,
    /// A local is read before any store on some path.
    UninitializedLocal,
    /// A local whose value is used after a join point has different kinds
    /// on the incoming paths.
    InconsistentLocal,
    /// Execution can run past the last operation.
    FallsOffEnd,
    /// Return kind does not match the declared signature.
    ReturnMismatch,
    /// A parameter is declared `void`.
    VoidParameter,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MalformedReason::EmptyBody => "empty body",
            MalformedReason::InvalidTarget => "jump target out of range",
            MalformedReason::StackUnderflow => "operand stack underflow",
            MalformedReason::StackDepthMismatch => "stack depth mismatch at join point",
            MalformedReason::KindMismatch => "operand kind mismatch",
            MalformedReason::UninitializedLocal => "load of unset local",
            MalformedReason::InconsistentLocal => "local has conflicting kinds at join point",
            MalformedReason::FallsOffEnd => "control falls off the end of the body",
            MalformedReason::ReturnMismatch => "return does not match signature",
            MalformedReason::VoidParameter => "void parameter type",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by [`GraphBuilder::build`](crate::GraphBuilder::build).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    Malformed {
        position: Option<usize>,
        reason: MalformedReason,
    },
    /// Known-unsupported construct, such as unbalanced monitors or an
    /// unsupported operation.
    Bailout { position: usize, reason: String },
    /// A referenced type could not be resolved.
    Linkage { type_name: String, position: usize },
}

impl BuildError {
    pub(crate) fn malformed(position: usize, reason: MalformedReason) -> Self {
        BuildError::Malformed {
            position: Some(position),
            reason,
        }
    }

    /// Bailouts and linkage failures are expected noise and are only counted.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, BuildError::Bailout { .. } | BuildError::Linkage { .. })
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Malformed {
                position: Some(pos),
                reason,
            } => write!(f, "malformed body at {}: {}", pos, reason),
            BuildError::Malformed {
                position: None,
                reason,
            } => write!(f, "malformed body: {}", reason),
            BuildError::Bailout { position, reason } => {
                write!(f, "bailout at {}: {}", position, reason)
            }
            BuildError::Linkage {
                type_name,
                position,
            } => write!(f, "cannot resolve type {} at {}", type_name, position),
        }
    }
}

impl std::error::Error for BuildError {}
