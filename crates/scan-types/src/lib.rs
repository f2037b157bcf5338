//! Shared types for the invariant-scan workspace.
//!
//! This crate provides the vocabulary exchanged between the unit catalog, the
//! graph builder and the verification phases, breaking the dependency between
//! the graph crate and the scanner itself.
//!
//! ## Unit Types
//!
//! - [`UnitDescriptor`](unit::UnitDescriptor) - One analyzable method body with its flags
//! - [`TypeDescriptor`](unit::TypeDescriptor) - A declared type and its units, in discovery order
//! - [`Insn`](insn::Insn) - The low-level stack-machine operations a body is made of
//!
//! ## Type Information
//!
//! - [`TypeRef`](hierarchy::TypeRef) - Value type of a parameter, field or return
//! - [`TypeHierarchy`](hierarchy::TypeHierarchy) - Subtyping and annotation lookup

pub mod hierarchy;
pub mod insn;
pub mod unit;

// Re-export commonly used types at crate root
pub use hierarchy::{TypeHierarchy, TypeInfo, TypeRef};
pub use insn::{FieldRef, Insn, IntCondition, MethodRef};
pub use unit::{Signature, TypeDescriptor, UnitDescriptor, UnitFlags};

/// Type name given to string literals.
pub const STRING_TYPE: &str = "String";
