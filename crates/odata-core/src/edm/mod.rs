//! Entity Data Model
//!
//! - `model`: the resolved, immutable type graph and its lookups
//! - `definition`: declarative (serde/YAML) type and operation declarations
//! - `builder`: whole-set validation and model assembly
//! - `registry`: process-wide registration with a lazily rebuilt cache

pub mod builder;
pub mod definition;
pub mod model;
pub mod registry;

use serde::Serialize;
use thiserror::Error;

pub use builder::build_model;
pub use definition::{
    ComplexDeclaration, Declaration, EntityDeclaration, EnumDeclaration, ModelDefinition,
    NavigationDeclaration, OperationDeclaration, PropertyDeclaration, TypeDefinitionDeclaration,
};
pub use model::{
    EdmType, EntityDataModel, EntityType, NavigationProperty, Operation, OperationKind,
    PrimitiveKind, QualifiedName, StructuralProperty, TypeRef,
};
pub use registry::EdmRegistry;

/// One broken rule found while building a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataViolation {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for MetadataViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("{}", summarize(.violations))]
    Inconsistent { violations: Vec<MetadataViolation> },
}

impl MetadataError {
    pub fn violations(&self) -> &[MetadataViolation] {
        match self {
            MetadataError::Inconsistent { violations } => violations,
        }
    }
}

fn summarize(violations: &[MetadataViolation]) -> String {
    let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
    format!("{} violation(s): {}", violations.len(), details.join("; "))
}
