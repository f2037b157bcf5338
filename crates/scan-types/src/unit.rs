//! Unit and type descriptors supplied by a catalog.

use serde::{Deserialize, Serialize};

use crate::hierarchy::TypeRef;
use crate::insn::Insn;

/// Per-unit flags discovered alongside the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub is_abstract: bool,
    /// The unit opted out of marker-sensitive checks.
    #[serde(default)]
    pub has_exclusion_marker: bool,
}

impl UnitFlags {
    /// Native and abstract units have no body to build a graph from.
    pub fn has_body(&self) -> bool {
        !self.is_native && !self.is_abstract
    }
}

/// Declared signature of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub params: Vec<TypeRef>,
    pub returns: TypeRef,
    #[serde(default)]
    pub is_static: bool,
}

impl Signature {
    pub fn new(params: Vec<TypeRef>, returns: TypeRef, is_static: bool) -> Self {
        Self {
            params,
            returns,
            is_static,
        }
    }
}

/// One analyzable program unit (a method body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    /// Enclosing type.
    pub holder: String,
    /// Simple name within the holder.
    pub name: String,
    pub signature: Signature,
    pub body: Vec<Insn>,
    pub flags: UnitFlags,
}

impl UnitDescriptor {
    /// Fully qualified name, `Holder.name`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.holder, self.name)
    }
}

/// A declared type found in a scanned artifact, with its units in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub units: Vec<UnitDescriptor>,
}
