//! Declarative model definitions.
//!
//! A [`Declaration`] is what a service registers: one entity, complex, enum,
//! type-definition or operation. Declarations are plain data (YAML-friendly)
//! and are only checked when the whole set is built into a model.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::model::{NavigationBinding, OperationKind, TypeRef};

fn default_true() -> bool {
    true
}

fn default_enum_underlying() -> String {
    "Edm.Int32".to_string()
}

// =============================================================================
// DECLARATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Entity(EntityDeclaration),
    Complex(ComplexDeclaration),
    Enum(EnumDeclaration),
    TypeDefinition(TypeDefinitionDeclaration),
    Operation(OperationDeclaration),
}

impl Declaration {
    pub fn namespace(&self) -> &str {
        match self {
            Declaration::Entity(d) => &d.namespace,
            Declaration::Complex(d) => &d.namespace,
            Declaration::Enum(d) => &d.namespace,
            Declaration::TypeDefinition(d) => &d.namespace,
            Declaration::Operation(d) => &d.namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Declaration::Entity(d) => &d.name,
            Declaration::Complex(d) => &d.name,
            Declaration::Enum(d) => &d.name,
            Declaration::TypeDefinition(d) => &d.name,
            Declaration::Operation(d) => &d.name,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace(), self.name())
    }

    /// Originating type tag. Defaults to the fully-qualified name.
    /// Operations have no tag.
    pub fn tag(&self) -> Option<String> {
        let explicit = match self {
            Declaration::Entity(d) => d.tag.as_ref(),
            Declaration::Complex(d) => d.tag.as_ref(),
            Declaration::Enum(d) => d.tag.as_ref(),
            Declaration::TypeDefinition(d) => d.tag.as_ref(),
            Declaration::Operation(_) => return None,
        };
        Some(explicit.cloned().unwrap_or_else(|| self.full_name()))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Declaration::Entity(_) => "entity",
            Declaration::Complex(_) => "complex",
            Declaration::Enum(_) => "enum",
            Declaration::TypeDefinition(_) => "type definition",
            Declaration::Operation(_) => "operation",
        }
    }
}

impl From<EntityDeclaration> for Declaration {
    fn from(d: EntityDeclaration) -> Self {
        Declaration::Entity(d)
    }
}

impl From<ComplexDeclaration> for Declaration {
    fn from(d: ComplexDeclaration) -> Self {
        Declaration::Complex(d)
    }
}

impl From<EnumDeclaration> for Declaration {
    fn from(d: EnumDeclaration) -> Self {
        Declaration::Enum(d)
    }
}

impl From<TypeDefinitionDeclaration> for Declaration {
    fn from(d: TypeDefinitionDeclaration) -> Self {
        Declaration::TypeDefinition(d)
    }
}

impl From<OperationDeclaration> for Declaration {
    fn from(d: OperationDeclaration) -> Self {
        Declaration::Operation(d)
    }
}

// =============================================================================
// PROPERTIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub collection: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl PropertyDeclaration {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            collection: false,
            nullable: true,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef {
            type_name: self.type_name.clone(),
            collection: self.collection,
            nullable: self.nullable,
            max_length: self.max_length,
            precision: self.precision,
            scale: self.scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDeclaration {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub collection: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
}

impl NavigationDeclaration {
    pub fn single(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            collection: false,
            nullable: true,
            partner: None,
        }
    }

    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            collection: true,
            nullable: false,
            ..Self::single(name, target)
        }
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }
}

// =============================================================================
// STRUCTURED TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDeclaration {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDeclaration>,
    #[serde(default)]
    pub navigation: Vec<NavigationDeclaration>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "open")]
    pub is_open: bool,
    #[serde(default)]
    pub has_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singleton: Option<String>,
    #[serde(default)]
    pub bindings: Vec<NavigationBinding>,
}

impl EntityDeclaration {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tag: None,
            base_type: None,
            keys: Vec::new(),
            properties: Vec::new(),
            navigation: Vec::new(),
            is_abstract: false,
            is_open: false,
            has_stream: false,
            entity_set: None,
            singleton: None,
            bindings: Vec::new(),
        }
    }

    /// Declare a non-nullable key property.
    pub fn with_key(mut self, name: &str, type_name: &str) -> Self {
        self.keys.push(name.to_string());
        self.properties
            .push(PropertyDeclaration::new(name, type_name).not_null());
        self
    }

    pub fn with_key_property(mut self, property: PropertyDeclaration) -> Self {
        self.keys.push(property.name.clone());
        self.properties.push(property);
        self
    }

    pub fn with_property(mut self, property: PropertyDeclaration) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_navigation(mut self, navigation: NavigationDeclaration) -> Self {
        self.navigation.push(navigation);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn derived_from(mut self, base: impl Into<String>) -> Self {
        self.base_type = Some(base.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn open_type(mut self) -> Self {
        self.is_open = true;
        self
    }

    pub fn in_entity_set(mut self, name: impl Into<String>) -> Self {
        self.entity_set = Some(name.into());
        self
    }

    pub fn as_singleton(mut self, name: impl Into<String>) -> Self {
        self.singleton = Some(name.into());
        self
    }

    pub fn with_binding(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.bindings.push(NavigationBinding {
            path: path.into(),
            target: target.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexDeclaration {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDeclaration>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "open")]
    pub is_open: bool,
}

impl ComplexDeclaration {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tag: None,
            base_type: None,
            properties: Vec::new(),
            is_abstract: false,
            is_open: false,
        }
    }

    pub fn with_property(mut self, property: PropertyDeclaration) -> Self {
        self.properties.push(property);
        self
    }

    pub fn derived_from(mut self, base: impl Into<String>) -> Self {
        self.base_type = Some(base.into());
        self
    }
}

// =============================================================================
// ENUMS AND TYPE DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMemberDeclaration {
    pub name: String,
    /// Implicit values count up from the previous member (or 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDeclaration {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default = "default_enum_underlying")]
    pub underlying: String,
    pub members: Vec<EnumMemberDeclaration>,
    #[serde(default)]
    pub flags: bool,
}

impl EnumDeclaration {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, members: &[&str]) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tag: None,
            underlying: default_enum_underlying(),
            members: members
                .iter()
                .map(|m| EnumMemberDeclaration {
                    name: m.to_string(),
                    value: None,
                })
                .collect(),
            flags: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinitionDeclaration {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub underlying: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

// =============================================================================
// OPERATIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTypeDeclaration {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub collection: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl ReturnTypeDeclaration {
    pub fn type_ref(&self) -> TypeRef {
        TypeRef {
            collection: self.collection,
            nullable: self.nullable,
            ..TypeRef::new(self.type_name.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDeclaration {
    pub namespace: String,
    pub name: String,
    pub operation: OperationKind,
    #[serde(default)]
    pub bound: bool,
    #[serde(default)]
    pub parameters: Vec<PropertyDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnTypeDeclaration>,
    #[serde(default)]
    pub composable: bool,
    /// Name of the container import exposing an unbound operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_entity_set: Option<String>,
}

impl OperationDeclaration {
    pub fn function(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, OperationKind::Function)
    }

    pub fn action(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, OperationKind::Action)
    }

    fn new(namespace: impl Into<String>, name: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            operation: kind,
            bound: false,
            parameters: Vec::new(),
            returns: None,
            composable: false,
            import: None,
            import_entity_set: None,
        }
    }

    /// Make the operation bound; the binding parameter goes first.
    pub fn bound_to(mut self, type_name: &str, collection: bool) -> Self {
        self.bound = true;
        let mut binding = PropertyDeclaration::new("bindingParameter", type_name).not_null();
        binding.collection = collection;
        self.parameters.insert(0, binding);
        self
    }

    pub fn with_parameter(mut self, parameter: PropertyDeclaration) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returning(mut self, type_name: &str, collection: bool) -> Self {
        self.returns = Some(ReturnTypeDeclaration {
            type_name: type_name.to_string(),
            collection,
            nullable: true,
        });
        self
    }

    pub fn imported_as(mut self, name: impl Into<String>) -> Self {
        self.import = Some(name.into());
        self
    }

    /// Entity set that entities returned through the import belong to.
    pub fn returning_from(mut self, entity_set: impl Into<String>) -> Self {
        self.import_entity_set = Some(entity_set.into());
        self
    }

    pub fn as_composable(mut self) -> Self {
        self.composable = true;
        self
    }
}

// =============================================================================
// MODEL FILE
// =============================================================================

/// A model file: an optional container name plus the declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

impl ModelDefinition {
    /// Parse YAML. Consistency is checked at build time, not here.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let definition: ModelDefinition = serde_yaml::from_str(yaml)?;
        Ok(definition)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading model file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing model file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_yaml_model() {
        let yaml = r#"
container: Demo
declarations:
  - kind: entity
    namespace: Demo
    name: Customer
    tag: app::Customer
    keys: [Id]
    properties:
      - name: Id
        type: Edm.String
        nullable: false
        max_length: 8
      - name: Name
        type: Edm.String
    navigation:
      - name: Orders
        target: Demo.Order
        collection: true
    entity_set: Customers
  - kind: enum
    namespace: Demo
    name: Color
    members:
      - name: Red
      - name: Green
        value: 4
  - kind: operation
    namespace: Demo
    name: TopCustomers
    operation: function
    returns:
      type: Demo.Customer
      collection: true
    import: TopCustomers
"#;
        let def = ModelDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(def.container.as_deref(), Some("Demo"));
        assert_eq!(def.declarations.len(), 3);

        let Declaration::Entity(customer) = &def.declarations[0] else {
            panic!("expected entity");
        };
        assert_eq!(customer.keys, vec!["Id"]);
        assert!(!customer.properties[0].nullable);
        assert!(customer.properties[1].nullable);
        assert_eq!(customer.properties[0].max_length, Some(8));
        assert_eq!(def.declarations[0].tag().as_deref(), Some("app::Customer"));

        let Declaration::Enum(color) = &def.declarations[1] else {
            panic!("expected enum");
        };
        assert_eq!(color.underlying, "Edm.Int32");
        assert_eq!(def.declarations[1].tag().as_deref(), Some("Demo.Color"));
        assert_eq!(def.declarations[2].tag(), None);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let yaml = "declarations:\n  - kind: widget\n    namespace: X\n    name: Y\n";
        assert!(ModelDefinition::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn builder_helpers() {
        let decl = EntityDeclaration::new("Demo", "Order")
            .with_key("Id", "Edm.Int32")
            .with_navigation(NavigationDeclaration::single("Customer", "Demo.Customer"))
            .in_entity_set("Orders");
        assert_eq!(decl.keys, vec!["Id"]);
        assert!(!decl.properties[0].nullable);
        assert_eq!(decl.entity_set.as_deref(), Some("Orders"));

        let op = OperationDeclaration::function("Demo", "Total")
            .bound_to("Demo.Order", false)
            .returning("Edm.Decimal", false);
        assert!(op.bound);
        assert_eq!(op.parameters[0].type_name, "Demo.Order");
    }
}
