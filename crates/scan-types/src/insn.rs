//! Low-level operations making up a unit body.
//!
//! Bodies are written for a small operand-stack machine. Branch targets are
//! indices into the body, so a body is self-contained and can be decoded
//! without any side tables.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hierarchy::TypeRef;

/// A call target as referenced from an `invoke` operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Declaring type.
    pub owner: String,
    pub name: String,
    /// Explicit parameter types (the receiver is not included).
    #[serde(default)]
    pub params: Vec<TypeRef>,
    #[serde(default = "void_type")]
    pub returns: TypeRef,
    #[serde(default)]
    pub is_static: bool,
}

impl MethodRef {
    /// Number of operand stack values an invocation consumes.
    pub fn arg_slots(&self) -> usize {
        self.params.len() + usize::from(!self.is_static)
    }

    pub fn matches(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "{}.{}({})", self.owner, self.name, params.join(", "))
    }
}

/// A static field as referenced from a `get_static` operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub ty: TypeRef,
    /// The field is a compile-time constant (static and final).
    #[serde(default)]
    pub is_constant: bool,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Integer comparison used by [`Insn::IfInt`], comparing the two topmost
/// stack values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntCondition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// One operation of a unit body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Insn {
    /// Push the value of a local slot.
    Load { local: u16 },
    /// Pop into a local slot.
    Store { local: u16 },
    ConstNull,
    ConstInt { value: i64 },
    ConstString { value: String },
    /// Push the value of a static field.
    GetStatic { field: FieldRef },
    /// Push a fresh instance of a type.
    New { ty: String },
    /// Pop the receiver (unless static) and the arguments, push the result
    /// unless the callee returns void.
    Invoke { method: MethodRef },
    /// Pop two ints, push their sum.
    Add,
    Pop,
    Dup,
    /// Pop two references, branch if they are the same instance.
    IfRefEq { target: usize },
    /// Pop two references, branch if they are distinct instances.
    IfRefNe { target: usize },
    IfNull { target: usize },
    IfNonNull { target: usize },
    /// Pop two ints, branch if the condition holds.
    IfInt { cond: IntCondition, target: usize },
    Goto { target: usize },
    Return,
    ReturnValue,
    Throw,
    MonitorEnter,
    MonitorExit,
    /// An operation outside the analyzable subset.
    Unsupported { mnemonic: String },
}

impl Insn {
    /// Branch target of a conditional or unconditional jump.
    pub fn branch_target(&self) -> Option<usize> {
        match self {
            Insn::IfRefEq { target }
            | Insn::IfRefNe { target }
            | Insn::IfNull { target }
            | Insn::IfNonNull { target }
            | Insn::IfInt { target, .. }
            | Insn::Goto { target } => Some(*target),
            _ => None,
        }
    }

    /// Control never continues to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Insn::Goto { .. } | Insn::Return | Insn::ReturnValue | Insn::Throw
        )
    }
}

fn void_type() -> TypeRef {
    TypeRef::Void
}
