//! Builders for units, catalogs and on-disk artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use invariant_scan::catalog::StaticCatalog;
use invariant_scan::config::ScanConfig;
use invariant_scan::phases::PhaseRegistry;
use invariant_scan::scheduler::ScanRequest;
use invariant_scan::types::{
    Insn, MethodRef, Signature, TypeDescriptor, TypeHierarchy, TypeInfo, TypeRef, UnitDescriptor,
    UnitFlags,
};

/// Hierarchy with the sensitive `JavaType` family, the `Node` family and a
/// few plain types.
pub fn hierarchy() -> TypeHierarchy {
    let mut h = TypeHierarchy::new()
        .with_type("Object", &[])
        .with_type("JavaType", &["Object"])
        .with_type("HotSpotType", &["JavaType"])
        .with_type("Node", &["Object"])
        .with_type("Acme.Foo", &["Object"])
        .with_type("Acme.Bar", &["Object"])
        .with_type("Acme.BareNode", &["Node"]);
    h.insert(
        "Node",
        TypeInfo {
            supertypes: vec!["Object".into()],
            annotations: vec!["NodeInfo".into()],
            is_interface: false,
        },
    );
    h
}

/// `static int name(JavaType a, JavaType b) { return a == b ? 1 : 0; }`
pub fn comparing_unit(holder: &str, name: &str) -> UnitDescriptor {
    UnitDescriptor {
        holder: holder.into(),
        name: name.into(),
        signature: Signature::new(
            vec![TypeRef::object("JavaType"), TypeRef::object("JavaType")],
            TypeRef::Int,
            true,
        ),
        body: vec![
            Insn::Load { local: 0 },
            Insn::Load { local: 1 },
            Insn::IfRefNe { target: 5 },
            Insn::ConstInt { value: 1 },
            Insn::ReturnValue,
            Insn::ConstInt { value: 0 },
            Insn::ReturnValue,
        ],
        flags: UnitFlags::default(),
    }
}

/// `static int name(JavaType a, JavaType b) { return a.equals(b); }`
pub fn equals_unit(holder: &str, name: &str) -> UnitDescriptor {
    let equals = MethodRef {
        owner: "JavaType".into(),
        name: "equals".into(),
        params: vec![TypeRef::object("Object")],
        returns: TypeRef::Int,
        is_static: false,
    };
    UnitDescriptor {
        holder: holder.into(),
        name: name.into(),
        signature: Signature::new(
            vec![TypeRef::object("JavaType"), TypeRef::object("JavaType")],
            TypeRef::Int,
            true,
        ),
        body: vec![
            Insn::Load { local: 0 },
            Insn::Load { local: 1 },
            Insn::Invoke { method: equals },
            Insn::ReturnValue,
        ],
        flags: UnitFlags::default(),
    }
}

/// A unit whose body pops from an empty stack.
pub fn malformed_unit(holder: &str, name: &str) -> UnitDescriptor {
    UnitDescriptor {
        holder: holder.into(),
        name: name.into(),
        signature: Signature::new(vec![], TypeRef::Void, true),
        body: vec![Insn::Pop, Insn::Return],
        flags: UnitFlags::default(),
    }
}

pub fn type_with(name: &str, units: Vec<UnitDescriptor>) -> TypeDescriptor {
    TypeDescriptor {
        name: name.into(),
        units,
    }
}

pub fn catalog(types: Vec<TypeDescriptor>) -> StaticCatalog {
    StaticCatalog::new(types, hierarchy())
}

/// Request with the default phases and no class-level check.
pub fn request(catalog: StaticCatalog, phases: PhaseRegistry) -> ScanRequest {
    ScanRequest {
        catalog: Arc::new(catalog),
        phases: Arc::new(phases),
        class_check: None,
        filters: Vec::new(),
        builder: ScanConfig::default().builder_options(),
    }
}

/// Write `json` as `<dir>/<stem>.units.json` and return its path.
pub fn write_artifact(dir: &Path, stem: &str, json: &str) -> PathBuf {
    let path = dir.join(format!("{}.units.json", stem));
    std::fs::write(&path, json).unwrap();
    path
}
