//! Value types and the subtype relation between reference types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

/// Value type of a parameter, return, field or stack slot.
///
/// Serialized as a plain string: `"int"` (and its alias `"boolean"`),
/// `"void"`, or the name of a reference type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeRef {
    /// Any integral value; booleans are represented as ints.
    Int,
    /// No value (only valid as a return type).
    Void,
    /// A reference to an instance of the named type.
    Ref(String),
}

impl TypeRef {
    /// Shorthand for a reference type.
    pub fn object(name: impl Into<String>) -> Self {
        TypeRef::Ref(name.into())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }
}

impl From<String> for TypeRef {
    fn from(s: String) -> Self {
        match s.as_str() {
            "int" | "boolean" => TypeRef::Int,
            "void" => TypeRef::Void,
            _ => TypeRef::Ref(s),
        }
    }
}

impl From<&str> for TypeRef {
    fn from(s: &str) -> Self {
        TypeRef::from(s.to_string())
    }
}

impl From<TypeRef> for String {
    fn from(t: TypeRef) -> Self {
        match t {
            TypeRef::Int => "int".to_string(),
            TypeRef::Void => "void".to_string(),
            TypeRef::Ref(name) => name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Int => write!(f, "int"),
            TypeRef::Void => write!(f, "void"),
            TypeRef::Ref(name) => write!(f, "{}", name),
        }
    }
}

/// Declared facts about one reference type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Direct supertypes. The first entry of a class is its superclass.
    #[serde(default)]
    pub supertypes: Vec<String>,
    /// Metadata annotations present on the type.
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub is_interface: bool,
}

/// Subtype relation over every type known to a scan.
///
/// Types absent from the hierarchy are treated as unrelated leaves: they are
/// subtypes of themselves only.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    types: BTreeMap<String, TypeInfo>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. A later registration of the same name replaces the
    /// earlier one.
    pub fn insert(&mut self, name: impl Into<String>, info: TypeInfo) {
        self.types.insert(name.into(), info);
    }

    /// Builder-style variant of [`insert`](Self::insert) for a type with
    /// the given direct supertypes and no annotations.
    pub fn with_type(mut self, name: &str, supertypes: &[&str]) -> Self {
        self.insert(
            name,
            TypeInfo {
                supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
                ..TypeInfo::default()
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check whether `ty` carries the annotation `annotation`.
    pub fn has_annotation(&self, ty: &str, annotation: &str) -> bool {
        self.types
            .get(ty)
            .map(|info| info.annotations.iter().any(|a| a == annotation))
            .unwrap_or(false)
    }

    /// Reflexive, transitive subtype check.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(sub);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let Some(info) = self.types.get(current) else {
                continue;
            };
            for parent in &info.supertypes {
                if parent == sup {
                    return true;
                }
                queue.push_back(parent);
            }
        }
        false
    }

    /// The most specific type both `a` and `b` are assignable to, following
    /// `a`'s superclass chain. Returns `None` when the only common ancestor
    /// is the implicit root of all reference types. Interfaces have no
    /// superclass chain, so two unrelated interfaces meet at the root even
    /// when they share a superinterface.
    pub fn common_supertype(&self, a: &str, b: &str) -> Option<String> {
        if self.is_subtype(a, b) {
            return Some(b.to_string());
        }
        if self.is_subtype(b, a) {
            return Some(a.to_string());
        }
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = a;
        while seen.insert(current) {
            let Some(superclass) = self
                .types
                .get(current)
                .filter(|info| !info.is_interface)
                .and_then(|info| info.supertypes.first())
            else {
                break;
            };
            if self.is_subtype(b, superclass) {
                return Some(superclass.clone());
            }
            current = superclass;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> TypeHierarchy {
        TypeHierarchy::new()
            .with_type("Object", &[])
            .with_type("JavaType", &["Object"])
            .with_type("ResolvedJavaType", &["JavaType"])
            .with_type("HotSpotType", &["Object", "ResolvedJavaType"])
            .with_type("Value", &["Object"])
            .with_type("Constant", &["Value"])
            .with_type("Register", &["Value"])
    }

    #[test]
    fn test_type_ref_string_forms() {
        assert_eq!(TypeRef::from("int"), TypeRef::Int);
        assert_eq!(TypeRef::from("boolean"), TypeRef::Int);
        assert_eq!(TypeRef::from("void"), TypeRef::Void);
        assert_eq!(TypeRef::from("JavaType"), TypeRef::object("JavaType"));
        assert_eq!(String::from(TypeRef::object("Foo")), "Foo");
    }

    #[test]
    fn test_subtype_through_interfaces() {
        let h = hierarchy();
        assert!(h.is_subtype("HotSpotType", "JavaType"));
        assert!(h.is_subtype("JavaType", "JavaType"));
        assert!(!h.is_subtype("JavaType", "HotSpotType"));
        assert!(!h.is_subtype("Unknown", "JavaType"));
        assert!(h.is_subtype("Unknown", "Unknown"));
    }

    #[test]
    fn test_common_supertype() {
        let h = hierarchy();
        assert_eq!(
            h.common_supertype("Constant", "Register").as_deref(),
            Some("Value")
        );
        assert_eq!(
            h.common_supertype("ResolvedJavaType", "JavaType").as_deref(),
            Some("JavaType")
        );
        assert_eq!(
            h.common_supertype("Constant", "JavaType").as_deref(),
            Some("Object")
        );
        assert_eq!(h.common_supertype("Unknown", "JavaType"), None);
    }

    #[test]
    fn test_interfaces_meet_at_root() {
        let mut h = hierarchy();
        for name in ["Acme.Named", "Acme.Sized"] {
            h.insert(
                name,
                TypeInfo {
                    supertypes: vec!["JavaType".to_string()],
                    annotations: vec![],
                    is_interface: true,
                },
            );
        }
        assert!(h.is_subtype("Acme.Sized", "JavaType"));
        assert_eq!(h.common_supertype("Acme.Named", "Acme.Sized"), None);
        assert_eq!(
            h.common_supertype("Acme.Named", "JavaType").as_deref(),
            Some("JavaType")
        );

        h.insert(
            "Acme.Sized",
            TypeInfo {
                supertypes: vec!["JavaType".to_string()],
                annotations: vec![],
                is_interface: false,
            },
        );
        h.insert(
            "Acme.Named",
            TypeInfo {
                supertypes: vec!["JavaType".to_string()],
                annotations: vec![],
                is_interface: false,
            },
        );
        assert_eq!(
            h.common_supertype("Acme.Named", "Acme.Sized").as_deref(),
            Some("JavaType")
        );
    }

    #[test]
    fn test_has_annotation() {
        let mut h = hierarchy();
        h.insert(
            "ConstantNode",
            TypeInfo {
                supertypes: vec!["Node".to_string()],
                annotations: vec!["NodeInfo".to_string()],
                is_interface: false,
            },
        );
        assert!(h.has_annotation("ConstantNode", "NodeInfo"));
        assert!(!h.has_annotation("Value", "NodeInfo"));
        assert!(!h.has_annotation("Missing", "NodeInfo"));
    }
}
