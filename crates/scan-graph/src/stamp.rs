//! Inferred value types attached to graph nodes.

use invariant_scan_types::{TypeHierarchy, TypeRef};
use std::fmt;

/// Coarse kind of a value, used to check that an edge's consumer can accept
/// what its producer yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Object,
    Void,
    Illegal,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Int => "int",
            ValueKind::Object => "object",
            ValueKind::Void => "void",
            ValueKind::Illegal => "illegal",
        };
        write!(f, "{}", s)
    }
}

/// What is known about a reference value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    /// Most specific known type; `None` means any reference type.
    pub ty: Option<String>,
    pub non_null: bool,
    /// The value is the null constant on every path.
    pub always_null: bool,
}

impl ObjectStamp {
    pub fn null() -> Self {
        Self {
            ty: None,
            non_null: false,
            always_null: true,
        }
    }

    /// A possibly-null value of a declared type.
    pub fn declared(ty: impl Into<String>) -> Self {
        Self {
            ty: Some(ty.into()),
            non_null: false,
            always_null: false,
        }
    }

    pub fn non_null(ty: impl Into<String>) -> Self {
        Self {
            ty: Some(ty.into()),
            non_null: true,
            always_null: false,
        }
    }

    /// Any reference, possibly null.
    pub fn unrestricted() -> Self {
        Self {
            ty: None,
            non_null: false,
            always_null: false,
        }
    }

    /// Least upper bound of two object stamps.
    pub fn meet(&self, other: &ObjectStamp, hierarchy: &TypeHierarchy) -> ObjectStamp {
        if self.always_null {
            return ObjectStamp {
                non_null: false,
                ..other.clone()
            };
        }
        if other.always_null {
            return ObjectStamp {
                non_null: false,
                ..self.clone()
            };
        }
        let ty = match (&self.ty, &other.ty) {
            (Some(a), Some(b)) => hierarchy.common_supertype(a, b),
            _ => None,
        };
        ObjectStamp {
            ty,
            non_null: self.non_null && other.non_null,
            always_null: false,
        }
    }
}

/// Inferred value-type information of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// The node produces no value (control nodes, void calls).
    Void,
    Int,
    Object(ObjectStamp),
    /// Inputs disagree in kind; only found on phis nothing consumes.
    Illegal,
}

impl Stamp {
    /// Stamp of a value declared with the given type.
    pub fn for_type(ty: &TypeRef) -> Stamp {
        match ty {
            TypeRef::Int => Stamp::Int,
            TypeRef::Void => Stamp::Void,
            TypeRef::Ref(name) => Stamp::Object(ObjectStamp::declared(name.clone())),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Stamp::Void => ValueKind::Void,
            Stamp::Int => ValueKind::Int,
            Stamp::Object(_) => ValueKind::Object,
            Stamp::Illegal => ValueKind::Illegal,
        }
    }

    /// Most general stamp of the same kind, used as a placeholder on phis
    /// until their inputs are complete.
    pub fn widened(&self) -> Stamp {
        match self {
            Stamp::Object(_) => Stamp::Object(ObjectStamp::unrestricted()),
            other => other.clone(),
        }
    }

    /// Least upper bound. Stamps of different kinds meet to
    /// [`Stamp::Illegal`].
    pub fn meet(&self, other: &Stamp, hierarchy: &TypeHierarchy) -> Stamp {
        match (self, other) {
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.meet(b, hierarchy)),
            (Stamp::Int, Stamp::Int) => Stamp::Int,
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            _ => Stamp::Illegal,
        }
    }

    /// The value is a reference whose known type is a subtype of `ty`.
    ///
    /// Stamps with no known type are not assignable to anything specific.
    pub fn is_assignable_to(&self, ty: &str, hierarchy: &TypeHierarchy) -> bool {
        match self {
            Stamp::Object(ObjectStamp {
                ty: Some(known), ..
            }) => hierarchy.is_subtype(known, ty),
            _ => false,
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Void => write!(f, "void"),
            Stamp::Int => write!(f, "int"),
            Stamp::Illegal => write!(f, "illegal"),
            Stamp::Object(o) if o.always_null => write!(f, "null"),
            Stamp::Object(o) => {
                let name = o.ty.as_deref().unwrap_or("Object");
                if o.non_null {
                    write!(f, "{}!", name)
                } else {
                    write!(f, "{}", name)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> TypeHierarchy {
        TypeHierarchy::new()
            .with_type("Object", &[])
            .with_type("Value", &["Object"])
            .with_type("Constant", &["Value"])
            .with_type("Register", &["Value"])
    }

    #[test]
    fn test_meet_with_null_keeps_type() {
        let h = hierarchy();
        let met = ObjectStamp::null().meet(&ObjectStamp::non_null("Constant"), &h);
        assert_eq!(met, ObjectStamp::declared("Constant"));
    }

    #[test]
    fn test_meet_siblings_goes_to_parent() {
        let h = hierarchy();
        let met = Stamp::Object(ObjectStamp::non_null("Constant"))
            .meet(&Stamp::Object(ObjectStamp::non_null("Register")), &h);
        assert_eq!(met, Stamp::Object(ObjectStamp::non_null("Value")));
    }

    #[test]
    fn test_meet_mixed_kinds_is_illegal() {
        let h = hierarchy();
        assert_eq!(
            Stamp::Int.meet(&Stamp::Object(ObjectStamp::null()), &h),
            Stamp::Illegal
        );
    }

    #[test]
    fn test_assignability() {
        let h = hierarchy();
        let s = Stamp::for_type(&TypeRef::object("Constant"));
        assert!(s.is_assignable_to("Value", &h));
        assert!(!s.is_assignable_to("Register", &h));
        assert!(!Stamp::Object(ObjectStamp::null()).is_assignable_to("Value", &h));
        assert!(!Stamp::Int.is_assignable_to("Value", &h));
    }
}
