//! Entity Data Model: the resolved, validated metadata graph.
//!
//! Instances are only produced by [`super::builder::build_model`], which
//! validates the whole declaration set first. Nothing here is mutable after
//! construction; the registry hands out `Arc<EntityDataModel>`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// NAMES
// =============================================================================

/// Namespace-qualified name: `Demo.Model.Customer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split at the last `.`; a name without a namespace is rejected.
    pub fn parse(full: &str) -> Option<Self> {
        let (ns, name) = full.rsplit_once('.')?;
        if ns.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(ns, name))
    }

    pub fn full(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

// =============================================================================
// PRIMITIVES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Binary,
    Boolean,
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Guid,
    Date,
    DateTimeOffset,
    TimeOfDay,
    Duration,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 16] = [
        PrimitiveKind::Binary,
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::SByte,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::Single,
        PrimitiveKind::Double,
        PrimitiveKind::Decimal,
        PrimitiveKind::String,
        PrimitiveKind::Guid,
        PrimitiveKind::Date,
        PrimitiveKind::DateTimeOffset,
        PrimitiveKind::TimeOfDay,
        PrimitiveKind::Duration,
    ];

    pub fn edm_name(&self) -> &'static str {
        match self {
            PrimitiveKind::Binary => "Edm.Binary",
            PrimitiveKind::Boolean => "Edm.Boolean",
            PrimitiveKind::Byte => "Edm.Byte",
            PrimitiveKind::SByte => "Edm.SByte",
            PrimitiveKind::Int16 => "Edm.Int16",
            PrimitiveKind::Int32 => "Edm.Int32",
            PrimitiveKind::Int64 => "Edm.Int64",
            PrimitiveKind::Single => "Edm.Single",
            PrimitiveKind::Double => "Edm.Double",
            PrimitiveKind::Decimal => "Edm.Decimal",
            PrimitiveKind::String => "Edm.String",
            PrimitiveKind::Guid => "Edm.Guid",
            PrimitiveKind::Date => "Edm.Date",
            PrimitiveKind::DateTimeOffset => "Edm.DateTimeOffset",
            PrimitiveKind::TimeOfDay => "Edm.TimeOfDay",
            PrimitiveKind::Duration => "Edm.Duration",
        }
    }

    pub fn from_edm_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.edm_name() == name)
    }

    /// Inclusive value range for the integer family.
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            PrimitiveKind::Byte => Some((0, u8::MAX as i64)),
            PrimitiveKind::SByte => Some((i8::MIN as i64, i8::MAX as i64)),
            PrimitiveKind::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            PrimitiveKind::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            PrimitiveKind::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn is_integral(&self) -> bool {
        self.integer_range().is_some()
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    /// Promotion order for arithmetic; higher wins.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            PrimitiveKind::Byte | PrimitiveKind::SByte => Some(0),
            PrimitiveKind::Int16 => Some(1),
            PrimitiveKind::Int32 => Some(2),
            PrimitiveKind::Int64 => Some(3),
            PrimitiveKind::Decimal => Some(4),
            PrimitiveKind::Single => Some(5),
            PrimitiveKind::Double => Some(6),
            _ => None,
        }
    }

    /// Kinds usable as entity keys.
    pub fn is_key_compatible(&self) -> bool {
        !matches!(
            self,
            PrimitiveKind::Binary | PrimitiveKind::Single | PrimitiveKind::Double
        )
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

// =============================================================================
// TYPE REFERENCES AND PROPERTIES
// =============================================================================

/// Reference to a type by fully-qualified name plus usage facets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub type_name: String,
    pub collection: bool,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl TypeRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            collection: false,
            nullable: true,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(kind.edm_name())
    }

    pub fn collection_of(type_name: impl Into<String>) -> Self {
        Self {
            collection: true,
            ..Self::new(type_name)
        }
    }

    /// `Collection(Ns.Type)` or `Ns.Type`.
    pub fn display_name(&self) -> String {
        if self.collection {
            format!("Collection({})", self.type_name)
        } else {
            self.type_name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralProperty {
    pub name: String,
    pub type_ref: TypeRef,
    /// Type that declared the property (differs from the owner for inherited ones).
    pub declared_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    /// Fully-qualified name of the target entity type.
    pub target: String,
    pub collection: bool,
    pub nullable: bool,
    pub partner: Option<String>,
    pub declared_by: String,
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: QualifiedName,
    /// Originating type tag ("class") this type was declared from.
    pub tag: String,
    pub base_type: Option<String>,
    /// Flattened, base-first.
    pub properties: Vec<StructuralProperty>,
    pub navigation: Vec<NavigationProperty>,
    /// Effective (possibly inherited) key property names, in declaration order.
    pub keys: Vec<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub has_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexType {
    pub name: QualifiedName,
    pub tag: String,
    pub base_type: Option<String>,
    pub properties: Vec<StructuralProperty>,
    pub is_abstract: bool,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: QualifiedName,
    pub tag: String,
    pub underlying: PrimitiveKind,
    pub members: Vec<EnumMember>,
    pub is_flags: bool,
}

impl EnumType {
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: QualifiedName,
    pub tag: String,
    pub underlying: PrimitiveKind,
    pub max_length: Option<u32>,
}

/// Built-in abstract types (`Edm.PrimitiveType`, `Edm.ComplexType`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbstractType {
    PrimitiveType,
    ComplexType,
    EntityType,
    Untyped,
}

impl AbstractType {
    pub const ALL: [AbstractType; 4] = [
        AbstractType::PrimitiveType,
        AbstractType::ComplexType,
        AbstractType::EntityType,
        AbstractType::Untyped,
    ];

    pub fn edm_name(&self) -> &'static str {
        match self {
            AbstractType::PrimitiveType => "Edm.PrimitiveType",
            AbstractType::ComplexType => "Edm.ComplexType",
            AbstractType::EntityType => "Edm.EntityType",
            AbstractType::Untyped => "Edm.Untyped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdmType {
    Primitive(PrimitiveKind),
    Complex(ComplexType),
    Entity(EntityType),
    Enum(EnumType),
    TypeDefinition(TypeDefinition),
    Abstract(AbstractType),
}

impl EdmType {
    pub fn full_name(&self) -> String {
        match self {
            EdmType::Primitive(k) => k.edm_name().to_string(),
            EdmType::Complex(t) => t.name.full(),
            EdmType::Entity(t) => t.name.full(),
            EdmType::Enum(t) => t.name.full(),
            EdmType::TypeDefinition(t) => t.name.full(),
            EdmType::Abstract(t) => t.edm_name().to_string(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            EdmType::Complex(t) => Some(&t.tag),
            EdmType::Entity(t) => Some(&t.tag),
            EdmType::Enum(t) => Some(&t.tag),
            EdmType::TypeDefinition(t) => Some(&t.tag),
            EdmType::Primitive(_) | EdmType::Abstract(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EdmType::Primitive(_) => "primitive",
            EdmType::Complex(_) => "complex",
            EdmType::Entity(_) => "entity",
            EdmType::Enum(_) => "enum",
            EdmType::TypeDefinition(_) => "type definition",
            EdmType::Abstract(_) => "abstract",
        }
    }

    pub fn as_entity(&self) -> Option<&EntityType> {
        match self {
            EdmType::Entity(t) => Some(t),
            _ => None,
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Action,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: QualifiedName,
    pub kind: OperationKind,
    /// When bound, the first parameter is the binding parameter.
    pub is_bound: bool,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    pub is_composable: bool,
}

impl Operation {
    pub fn binding_parameter(&self) -> Option<&Parameter> {
        if self.is_bound {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters supplied in the URI or body (binding parameter excluded).
    pub fn call_parameters(&self) -> &[Parameter] {
        if self.is_bound {
            self.parameters.get(1..).unwrap_or(&[])
        } else {
            &self.parameters
        }
    }
}

// =============================================================================
// CONTAINER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationBinding {
    pub path: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
    pub navigation_bindings: Vec<NavigationBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Singleton {
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationImport {
    pub name: String,
    /// Fully-qualified name of the imported (unbound) operation.
    pub operation: String,
    pub entity_set: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityContainer {
    pub name: String,
    pub entity_sets: Vec<EntitySet>,
    pub singletons: Vec<Singleton>,
    pub action_imports: Vec<OperationImport>,
    pub function_imports: Vec<OperationImport>,
}

/// Namespace-scoped grouping, kept for metadata rendering order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub namespace: String,
    pub types: Vec<String>,
    pub operations: Vec<String>,
}

// =============================================================================
// MODEL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDataModel {
    pub(crate) schemas: Vec<Schema>,
    pub(crate) types: BTreeMap<String, EdmType>,
    pub(crate) tags: HashMap<String, String>,
    pub(crate) operations: BTreeMap<String, Vec<Operation>>,
    pub(crate) container: EntityContainer,
}

impl EntityDataModel {
    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn container(&self) -> &EntityContainer {
        &self.container
    }

    pub fn get_type(&self, name: &str) -> Option<&EdmType> {
        self.types.get(name)
    }

    /// Lookup by originating type tag; agrees with [`Self::get_type`].
    pub fn get_type_by_tag(&self, tag: &str) -> Option<&EdmType> {
        self.tags.get(tag).and_then(|name| self.types.get(name))
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.get_type(name).and_then(EdmType::as_entity)
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.container.entity_sets.iter().find(|s| s.name == name)
    }

    pub fn singleton(&self, name: &str) -> Option<&Singleton> {
        self.container.singletons.iter().find(|s| s.name == name)
    }

    pub fn function_import(&self, name: &str) -> Option<&OperationImport> {
        self.container
            .function_imports
            .iter()
            .find(|i| i.name == name)
    }

    pub fn action_import(&self, name: &str) -> Option<&OperationImport> {
        self.container.action_imports.iter().find(|i| i.name == name)
    }

    /// All overloads declared under a fully-qualified operation name.
    pub fn operations(&self, name: &str) -> &[Operation] {
        self.operations.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unbound_operation(&self, name: &str) -> Option<&Operation> {
        self.operations(name).iter().find(|op| !op.is_bound)
    }

    /// Find the overload of `name` bound to `binding_type` (or one of its bases).
    pub fn bound_operation(
        &self,
        name: &str,
        binding_type: &str,
        collection: bool,
    ) -> Option<&Operation> {
        self.operations(name).iter().find(|op| {
            op.binding_parameter().is_some_and(|p| {
                p.type_ref.collection == collection
                    && self.is_derived_from(binding_type, &p.type_ref.type_name)
            })
        })
    }

    /// Structural property, including inherited ones, of an entity or complex type.
    pub fn structural_property(&self, type_name: &str, property: &str) -> Option<&StructuralProperty> {
        self.structural_properties(type_name)
            .iter()
            .find(|p| p.name == property)
    }

    pub fn structural_properties(&self, type_name: &str) -> &[StructuralProperty] {
        match self.get_type(type_name) {
            Some(EdmType::Entity(t)) => &t.properties,
            Some(EdmType::Complex(t)) => &t.properties,
            _ => &[],
        }
    }

    pub fn navigation_property(&self, type_name: &str, property: &str) -> Option<&NavigationProperty> {
        self.entity_type(type_name)?
            .navigation
            .iter()
            .find(|p| p.name == property)
    }

    /// Key properties of an entity type, in key order.
    pub fn key_properties(&self, type_name: &str) -> Vec<&StructuralProperty> {
        let Some(entity) = self.entity_type(type_name) else {
            return Vec::new();
        };
        entity
            .keys
            .iter()
            .filter_map(|k| entity.properties.iter().find(|p| &p.name == k))
            .collect()
    }

    /// True when `derived` is `base` or inherits from it.
    pub fn is_derived_from(&self, derived: &str, base: &str) -> bool {
        let mut current = Some(derived.to_string());
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = match self.get_type(&name) {
                Some(EdmType::Entity(t)) => t.base_type.clone(),
                Some(EdmType::Complex(t)) => t.base_type.clone(),
                _ => None,
            };
        }
        false
    }

    /// Primitive kind behind a type name, looking through type definitions.
    pub fn primitive_kind(&self, type_name: &str) -> Option<PrimitiveKind> {
        match self.get_type(type_name)? {
            EdmType::Primitive(k) => Some(*k),
            EdmType::TypeDefinition(t) => Some(t.underlying),
            _ => None,
        }
    }

    pub fn enum_type(&self, type_name: &str) -> Option<&EnumType> {
        match self.get_type(type_name)? {
            EdmType::Enum(t) => Some(t),
            _ => None,
        }
    }

    /// User-declared types in schema order.
    pub fn declared_types(&self) -> impl Iterator<Item = &EdmType> {
        self.schemas
            .iter()
            .flat_map(|s| s.types.iter())
            .filter_map(|name| self.types.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_splits_at_last_dot() {
        let qn = QualifiedName::parse("Demo.Model.Customer").unwrap();
        assert_eq!(qn.namespace, "Demo.Model");
        assert_eq!(qn.name, "Customer");
        assert_eq!(qn.to_string(), "Demo.Model.Customer");
        assert!(QualifiedName::parse("Customer").is_none());
    }

    #[test]
    fn primitive_names_round_trip() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_edm_name(kind.edm_name()), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_edm_name("Edm.Nope"), None);
    }

    #[test]
    fn integer_ranges() {
        assert_eq!(PrimitiveKind::Byte.integer_range(), Some((0, 255)));
        assert_eq!(PrimitiveKind::Int16.integer_range(), Some((-32768, 32767)));
        assert!(PrimitiveKind::Decimal.integer_range().is_none());
        assert!(PrimitiveKind::Decimal.is_numeric());
    }

    #[test]
    fn collection_display_name() {
        assert_eq!(
            TypeRef::collection_of("Demo.Order").display_name(),
            "Collection(Demo.Order)"
        );
    }
}
