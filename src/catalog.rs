//! Unit catalogs: the ordered source of types and units to scan.
//!
//! The scheduler only sees the [`UnitCatalog`] trait. [`StaticCatalog`] is a
//! pre-enumerated, in-memory implementation, filled either directly or from
//! `*.units.json` artifact files by [`load_artifacts`].

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use invariant_scan_types::{
    Insn, Signature, TypeDescriptor, TypeHierarchy, TypeInfo, TypeRef, UnitDescriptor, UnitFlags,
};

/// File suffix of unit artifacts.
pub const ARTIFACT_SUFFIX: &str = ".units.json";

/// Ordered source of declared types, their units and the type hierarchy.
pub trait UnitCatalog: Send + Sync {
    /// Declared types in discovery order.
    fn types(&self) -> &[TypeDescriptor];

    /// Hierarchy covering declared and library types.
    fn hierarchy(&self) -> &TypeHierarchy;

    fn units(&self) -> Box<dyn Iterator<Item = &UnitDescriptor> + '_> {
        Box::new(self.types().iter().flat_map(|t| t.units.iter()))
    }

    fn unit_count(&self) -> usize {
        self.types().iter().map(|t| t.units.len()).sum()
    }
}

/// A catalog whose contents are fixed up front.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    types: Vec<TypeDescriptor>,
    declared: HashSet<String>,
    hierarchy: TypeHierarchy,
}

impl StaticCatalog {
    pub fn new(types: Vec<TypeDescriptor>, hierarchy: TypeHierarchy) -> Self {
        let declared = types.iter().map(|t| t.name.clone()).collect();
        Self {
            types,
            declared,
            hierarchy,
        }
    }

    /// Add the contents of one parsed artifact. Types already declared by an
    /// earlier artifact are skipped.
    pub fn add_artifact(&mut self, artifact: ArtifactFile, exclusion_marker: &str) {
        for library in artifact.library_types {
            if !self.hierarchy.contains(&library.name) {
                self.hierarchy.insert(library.name, library.info);
            }
        }

        for declared in artifact.types {
            if !self.declared.insert(declared.name.clone()) {
                warn!(type_name = %declared.name, "type declared twice, keeping first declaration");
                continue;
            }
            let units = declared
                .methods
                .into_iter()
                .map(|m| m.into_unit(&declared.name, exclusion_marker))
                .collect();
            self.hierarchy.insert(declared.name.clone(), declared.info);
            self.types.push(TypeDescriptor {
                name: declared.name,
                units,
            });
        }
    }
}

impl UnitCatalog for StaticCatalog {
    fn types(&self) -> &[TypeDescriptor] {
        &self.types
    }

    fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }
}

// =============================================================================
// Artifact format
// =============================================================================

/// Contents of one `*.units.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Types to scan.
    #[serde(default)]
    pub types: Vec<ArtifactType>,
    /// Types only needed for the hierarchy.
    #[serde(default)]
    pub library_types: Vec<LibraryType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactType {
    pub name: String,
    #[serde(flatten)]
    pub info: TypeInfo,
    #[serde(default)]
    pub methods: Vec<ArtifactMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryType {
    pub name: String,
    #[serde(flatten)]
    pub info: TypeInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMethod {
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeRef>,
    #[serde(default = "void")]
    pub returns: TypeRef,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub body: Vec<Insn>,
}

fn void() -> TypeRef {
    TypeRef::Void
}

impl ArtifactMethod {
    fn into_unit(self, holder: &str, exclusion_marker: &str) -> UnitDescriptor {
        let has_exclusion_marker = self.annotations.iter().any(|a| a == exclusion_marker);
        UnitDescriptor {
            holder: holder.to_string(),
            name: self.name,
            signature: Signature::new(self.params, self.returns, self.is_static),
            body: self.body,
            flags: UnitFlags {
                is_native: self.is_native,
                is_abstract: self.is_abstract,
                has_exclusion_marker,
            },
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Build a catalog from artifact files and directories, in argument order.
/// Directories are searched recursively; their artifacts are read in path
/// order.
pub fn load_artifacts(paths: &[PathBuf], exclusion_marker: &str) -> Result<StaticCatalog> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            collect_artifacts(path, &mut found)?;
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(anyhow!("artifact path does not exist: {}", path.display()));
        }
    }

    let mut catalog = StaticCatalog::default();
    for file in &files {
        let artifact = read_artifact(file)?;
        debug!(
            path = %file.display(),
            types = artifact.types.len(),
            library_types = artifact.library_types.len(),
            "loaded artifact"
        );
        catalog.add_artifact(artifact, exclusion_marker);
    }
    info!(
        artifacts = files.len(),
        types = catalog.types().len(),
        units = catalog.unit_count(),
        "catalog loaded"
    );
    Ok(catalog)
}

pub fn read_artifact(path: &Path) -> Result<ArtifactFile> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse artifact {}", path.display()))
}

fn collect_artifacts(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_artifacts(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(ARTIFACT_SUFFIX))
        {
            out.push(path);
        }
    }
    Ok(())
}
