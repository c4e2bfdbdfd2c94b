//! Whole-model validating builder.
//!
//! Every check runs over the complete declaration set and every violation is
//! collected before deciding. A model is only produced when the set is
//! consistent, so no partially-built model can ever be observed.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::definition::{
    ComplexDeclaration, Declaration, EntityDeclaration, EnumDeclaration, OperationDeclaration,
};
use super::model::{
    AbstractType, ComplexType, EdmType, EntityContainer, EntityDataModel, EntitySet, EntityType,
    EnumMember, EnumType, NavigationProperty, Operation, OperationImport, OperationKind, Parameter,
    PrimitiveKind, QualifiedName, Schema, Singleton, StructuralProperty, TypeDefinition,
};
use super::{MetadataError, MetadataViolation};

/// What a type name resolves to while the model is still being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Primitive(PrimitiveKind),
    Abstract(AbstractType),
    Entity,
    Complex,
    Enum,
    TypeDefinition(Option<PrimitiveKind>),
}

/// Build and validate a model from a declaration set.
pub fn build_model(
    container_name: &str,
    declarations: &[Declaration],
) -> Result<EntityDataModel, MetadataError> {
    let mut builder = Builder::default();
    builder.index(declarations);
    for decl in declarations {
        match decl {
            Declaration::Entity(d) => builder.check_entity(d),
            Declaration::Complex(d) => builder.check_complex(d),
            Declaration::Enum(d) => builder.check_enum(d),
            Declaration::TypeDefinition(d) => {
                if PrimitiveKind::from_edm_name(&d.underlying).is_none() {
                    builder.violation(
                        "invalid-underlying-type",
                        format!(
                            "type definition {}.{} must use a primitive underlying type, not '{}'",
                            d.namespace, d.name, d.underlying
                        ),
                    );
                }
            }
            Declaration::Operation(d) => builder.check_operation(d),
        }
    }
    builder.check_container(declarations);

    if !builder.violations.is_empty() {
        return Err(MetadataError::Inconsistent {
            violations: builder.violations,
        });
    }
    Ok(builder.assemble(container_name, declarations))
}

#[derive(Default)]
struct Builder<'a> {
    types: HashMap<String, &'a Declaration>,
    violations: Vec<MetadataViolation>,
}

impl<'a> Builder<'a> {
    fn violation(&mut self, rule: &'static str, message: String) {
        self.violations.push(MetadataViolation {
            rule: rule.to_string(),
            message,
        });
    }

    // ── Names ────────────────────────────────────────────────────

    fn index(&mut self, declarations: &'a [Declaration]) {
        let mut tags: HashMap<String, String> = HashMap::new();
        for decl in declarations {
            let full = decl.full_name();
            if decl.namespace().is_empty() || decl.name().is_empty() || decl.name().contains('.') {
                self.violation("invalid-name", format!("'{full}' is not a valid qualified name"));
                continue;
            }
            if decl.namespace() == "Edm" {
                self.violation(
                    "reserved-namespace",
                    format!("'{full}' uses the reserved Edm namespace"),
                );
                continue;
            }
            if matches!(decl, Declaration::Operation(_)) {
                continue;
            }
            if self.types.contains_key(&full) {
                self.violation("duplicate-name", format!("type '{full}' is declared more than once"));
                continue;
            }
            if let Some(tag) = decl.tag() {
                if let Some(existing) = tags.get(&tag) {
                    self.violation(
                        "duplicate-tag",
                        format!("type tag '{tag}' is used by both '{existing}' and '{full}'"),
                    );
                    continue;
                }
                tags.insert(tag, full.clone());
            }
            self.types.insert(full, decl);
        }
        for decl in declarations {
            if matches!(decl, Declaration::Operation(_)) && self.types.contains_key(&decl.full_name()) {
                self.violation(
                    "duplicate-name",
                    format!("operation '{}' clashes with a type of the same name", decl.full_name()),
                );
            }
        }
    }

    fn category(&self, name: &str) -> Option<Category> {
        if let Some(kind) = PrimitiveKind::from_edm_name(name) {
            return Some(Category::Primitive(kind));
        }
        if let Some(a) = AbstractType::ALL.iter().find(|a| a.edm_name() == name) {
            return Some(Category::Abstract(*a));
        }
        match self.types.get(name).copied()? {
            Declaration::Entity(_) => Some(Category::Entity),
            Declaration::Complex(_) => Some(Category::Complex),
            Declaration::Enum(_) => Some(Category::Enum),
            Declaration::TypeDefinition(d) => {
                Some(Category::TypeDefinition(PrimitiveKind::from_edm_name(&d.underlying)))
            }
            Declaration::Operation(_) => None,
        }
    }

    // ── Inheritance ──────────────────────────────────────────────

    fn base_of(&self, name: &str) -> Option<&'a str> {
        let decl: &'a Declaration = self.types.get(name).copied()?;
        match decl {
            Declaration::Entity(d) => d.base_type.as_deref(),
            Declaration::Complex(d) => d.base_type.as_deref(),
            _ => None,
        }
    }

    /// Inheritance chain, most-derived first. `None` on a cycle or dangling base.
    fn lineage(&self, name: &str) -> Option<Vec<&'a Declaration>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut current = name.to_string();
        loop {
            if !seen.insert(current.clone()) {
                return None;
            }
            let decl: &'a Declaration = self.types.get(&current).copied()?;
            chain.push(decl);
            match self.base_of(&current) {
                Some(base) => current = base.to_string(),
                None => return Some(chain),
            }
        }
    }

    fn is_derived_from(&self, derived: &str, base: &str) -> bool {
        self.lineage(derived)
            .is_some_and(|chain| chain.iter().any(|d| d.full_name() == base))
    }

    fn check_base(&mut self, full: &str, base: Option<&str>, expected: Category) {
        let Some(base) = base else { return };
        match self.category(base) {
            None => self.violation(
                "unknown-base-type",
                format!("base type '{base}' of '{full}' is not declared"),
            ),
            Some(found) if found != expected => self.violation(
                "base-kind-mismatch",
                format!("'{full}' cannot derive from '{base}' of a different kind"),
            ),
            Some(_) => {
                if self.lineage(full).is_none() {
                    self.violation(
                        "inheritance-cycle",
                        format!("inheritance chain of '{full}' is cyclic"),
                    );
                }
            }
        }
    }

    // ── Members ──────────────────────────────────────────────────

    /// Member names declared by the ancestors of `full` (excluding itself).
    fn inherited_member_names(&self, full: &str) -> HashSet<String> {
        let mut names = HashSet::new();
        let Some(chain) = self.lineage(full) else {
            return names;
        };
        for decl in chain.iter().skip(1) {
            match decl {
                Declaration::Entity(d) => {
                    names.extend(d.properties.iter().map(|p| p.name.clone()));
                    names.extend(d.navigation.iter().map(|n| n.name.clone()));
                }
                Declaration::Complex(d) => {
                    names.extend(d.properties.iter().map(|p| p.name.clone()));
                }
                _ => {}
            }
        }
        names
    }

    fn check_member_names<'n>(&mut self, full: &str, names: impl Iterator<Item = &'n str>) {
        let inherited = self.inherited_member_names(full);
        let mut own = HashSet::new();
        for name in names {
            if !own.insert(name) {
                self.violation(
                    "duplicate-property",
                    format!("'{full}' declares property '{name}' more than once"),
                );
            } else if inherited.contains(name) {
                self.violation(
                    "duplicate-property",
                    format!("'{full}' redeclares inherited property '{name}'"),
                );
            }
        }
    }

    fn check_structural_property(
        &mut self,
        owner: &str,
        name: &str,
        type_name: &str,
        max_length: Option<u32>,
    ) {
        match self.category(type_name) {
            None => self.violation(
                "unresolved-type",
                format!("property '{owner}/{name}' has unknown type '{type_name}'"),
            ),
            Some(Category::Entity) | Some(Category::Abstract(AbstractType::EntityType)) => self
                .violation(
                    "entity-typed-property",
                    format!(
                        "structural property '{owner}/{name}' cannot be entity-typed; declare a navigation property"
                    ),
                ),
            Some(category) => {
                let stringy = matches!(
                    category,
                    Category::Primitive(PrimitiveKind::String | PrimitiveKind::Binary)
                        | Category::TypeDefinition(Some(PrimitiveKind::String | PrimitiveKind::Binary))
                );
                if max_length.is_some() && !stringy {
                    self.violation(
                        "invalid-facet",
                        format!("max length is only valid on string or binary properties ('{owner}/{name}')"),
                    );
                }
            }
        }
    }

    fn check_complex(&mut self, d: &'a ComplexDeclaration) {
        let full = format!("{}.{}", d.namespace, d.name);
        self.check_base(&full, d.base_type.as_deref(), Category::Complex);
        self.check_member_names(&full, d.properties.iter().map(|p| p.name.as_str()));
        for p in &d.properties {
            self.check_structural_property(&full, &p.name, &p.type_name, p.max_length);
        }
    }

    fn check_entity(&mut self, d: &'a EntityDeclaration) {
        let full = format!("{}.{}", d.namespace, d.name);
        self.check_base(&full, d.base_type.as_deref(), Category::Entity);
        self.check_member_names(
            &full,
            d.properties
                .iter()
                .map(|p| p.name.as_str())
                .chain(d.navigation.iter().map(|n| n.name.as_str())),
        );
        for p in &d.properties {
            self.check_structural_property(&full, &p.name, &p.type_name, p.max_length);
        }
        for nav in &d.navigation {
            self.check_navigation(&full, &nav.name, &nav.target, nav.partner.as_deref());
        }
        self.check_keys(&full, d);
    }

    fn check_navigation(&mut self, owner: &str, name: &str, target: &str, partner: Option<&str>) {
        if self.category(target) != Some(Category::Entity) {
            self.violation(
                "dangling-navigation",
                format!("navigation '{owner}/{name}' targets '{target}', which is not a declared entity type"),
            );
            return;
        }
        let Some(partner) = partner else { return };
        let back = self.flatten_navigation(target).into_iter().find(|n| n.name == partner);
        match back {
            None => self.violation(
                "missing-partner",
                format!("partner '{partner}' of '{owner}/{name}' does not exist on '{target}'"),
            ),
            Some(back)
                if !self.is_derived_from(owner, &back.target)
                    && !self.is_derived_from(&back.target, owner) =>
            {
                self.violation(
                    "partner-mismatch",
                    format!("partner '{target}/{partner}' does not point back to '{owner}'"),
                )
            }
            Some(_) => {}
        }
    }

    fn declared_keys(&self, full: &str) -> Option<&'a [String]> {
        let chain = self.lineage(full)?;
        chain.into_iter().find_map(|decl| match decl {
            Declaration::Entity(e) if !e.keys.is_empty() => Some(e.keys.as_slice()),
            _ => None,
        })
    }

    fn check_keys(&mut self, full: &str, d: &'a EntityDeclaration) {
        let Some(chain) = self.lineage(full) else {
            return;
        };
        let ancestor_keys = chain.iter().skip(1).any(|decl| {
            matches!(decl, Declaration::Entity(e) if !e.keys.is_empty())
        });
        if ancestor_keys && !d.keys.is_empty() {
            self.violation(
                "malformed-key",
                format!("'{full}' redeclares a key already defined by a base type"),
            );
            return;
        }
        if self.declared_keys(full).is_none() && !d.is_abstract {
            self.violation("missing-key", format!("entity type '{full}' has no key"));
            return;
        }

        let properties = self.flatten_properties(full);
        let mut seen = HashSet::new();
        for key in &d.keys {
            if !seen.insert(key.as_str()) {
                self.violation(
                    "malformed-key",
                    format!("key '{key}' of '{full}' is listed more than once"),
                );
                continue;
            }
            let Some(prop) = properties.iter().find(|p| &p.name == key) else {
                self.violation(
                    "malformed-key",
                    format!("key '{key}' of '{full}' is not a structural property"),
                );
                continue;
            };
            if prop.type_ref.nullable || prop.type_ref.collection {
                self.violation(
                    "malformed-key",
                    format!("key '{key}' of '{full}' must be a non-nullable single value"),
                );
                continue;
            }
            let key_compatible = match self.category(&prop.type_ref.type_name) {
                Some(Category::Primitive(kind)) | Some(Category::TypeDefinition(Some(kind))) => {
                    kind.is_key_compatible()
                }
                Some(Category::Enum) => true,
                _ => false,
            };
            if !key_compatible {
                self.violation(
                    "malformed-key",
                    format!(
                        "key '{key}' of '{full}' has type '{}', which cannot be a key",
                        prop.type_ref.type_name
                    ),
                );
            }
        }
    }

    fn flatten_properties(&self, full: &str) -> Vec<StructuralProperty> {
        let Some(chain) = self.lineage(full) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for decl in chain.iter().rev() {
            let properties = match decl {
                Declaration::Entity(d) => &d.properties,
                Declaration::Complex(d) => &d.properties,
                _ => continue,
            };
            out.extend(properties.iter().map(|p| StructuralProperty {
                name: p.name.clone(),
                type_ref: p.type_ref(),
                declared_by: decl.full_name(),
            }));
        }
        out
    }

    fn flatten_navigation(&self, full: &str) -> Vec<NavigationProperty> {
        let Some(chain) = self.lineage(full) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for decl in chain.iter().rev() {
            if let Declaration::Entity(d) = decl {
                out.extend(d.navigation.iter().map(|n| NavigationProperty {
                    name: n.name.clone(),
                    target: n.target.clone(),
                    collection: n.collection,
                    nullable: n.nullable,
                    partner: n.partner.clone(),
                    declared_by: decl.full_name(),
                }));
            }
        }
        out
    }

    // ── Enums ────────────────────────────────────────────────────

    fn enum_members(d: &EnumDeclaration) -> Vec<EnumMember> {
        let mut next = 0i64;
        d.members
            .iter()
            .map(|m| {
                let value = m.value.unwrap_or(next);
                next = value.saturating_add(1);
                EnumMember {
                    name: m.name.clone(),
                    value,
                }
            })
            .collect()
    }

    fn check_enum(&mut self, d: &'a EnumDeclaration) {
        let full = format!("{}.{}", d.namespace, d.name);
        let Some(range) = PrimitiveKind::from_edm_name(&d.underlying).and_then(|k| k.integer_range())
        else {
            self.violation(
                "invalid-underlying-type",
                format!("enum '{full}' must use an integral underlying type, not '{}'", d.underlying),
            );
            return;
        };
        if d.members.is_empty() {
            self.violation("empty-enum", format!("enum '{full}' has no members"));
        }
        let mut names = HashSet::new();
        for member in Self::enum_members(d) {
            if !names.insert(member.name.clone()) {
                self.violation(
                    "duplicate-member",
                    format!("enum '{full}' declares member '{}' twice", member.name),
                );
            }
            if member.value < range.0 || member.value > range.1 {
                self.violation(
                    "enum-value-range",
                    format!(
                        "member '{}' of '{full}' has value {} outside {}",
                        member.name, member.value, d.underlying
                    ),
                );
            }
        }
    }

    // ── Operations ───────────────────────────────────────────────

    fn check_operation(&mut self, d: &'a OperationDeclaration) {
        let full = format!("{}.{}", d.namespace, d.name);
        let mut names = HashSet::new();
        for p in &d.parameters {
            if !names.insert(p.name.as_str()) {
                self.violation(
                    "duplicate-parameter",
                    format!("operation '{full}' declares parameter '{}' twice", p.name),
                );
            }
            if self.category(&p.type_name).is_none() {
                self.violation(
                    "unresolved-type",
                    format!("parameter '{full}/{}' has unknown type '{}'", p.name, p.type_name),
                );
            }
        }
        if d.bound {
            match d.parameters.first() {
                None => self.violation(
                    "invalid-binding",
                    format!("bound operation '{full}' has no binding parameter"),
                ),
                Some(binding) => {
                    if !matches!(
                        self.category(&binding.type_name),
                        Some(Category::Entity) | Some(Category::Complex)
                    ) {
                        self.violation(
                            "invalid-binding",
                            format!(
                                "operation '{full}' is bound to '{}', which is not a structured type",
                                binding.type_name
                            ),
                        );
                    }
                }
            }
            if d.import.is_some() {
                self.violation(
                    "bound-import",
                    format!("bound operation '{full}' cannot be imported into the container"),
                );
            }
        }
        match &d.returns {
            None if d.operation == OperationKind::Function => self.violation(
                "missing-return-type",
                format!("function '{full}' must declare a return type"),
            ),
            Some(ret) if self.category(&ret.type_name).is_none() => self.violation(
                "unresolved-type",
                format!("return type '{}' of '{full}' is unknown", ret.type_name),
            ),
            _ => {}
        }
    }

    // ── Container ────────────────────────────────────────────────

    fn check_container(&mut self, declarations: &'a [Declaration]) {
        let mut members: HashSet<String> = HashSet::new();
        let mut sets: HashMap<String, String> = HashMap::new();
        let mut claim = |this: &mut Self, name: &str| {
            if !members.insert(name.to_string()) {
                this.violation(
                    "duplicate-container-member",
                    format!("container member '{name}' is declared more than once"),
                );
            }
        };

        for decl in declarations {
            match decl {
                Declaration::Entity(d) => {
                    let full = decl.full_name();
                    if let Some(set) = &d.entity_set {
                        claim(self, set);
                        sets.insert(set.clone(), full.clone());
                        if self.declared_keys(&full).is_none() {
                            self.violation(
                                "keyless-entity-set",
                                format!("entity set '{set}' uses keyless type '{full}'"),
                            );
                        }
                    }
                    if let Some(singleton) = &d.singleton {
                        claim(self, singleton);
                        sets.insert(singleton.clone(), full);
                    }
                }
                Declaration::Operation(d) => {
                    if let Some(import) = &d.import {
                        claim(self, import);
                    }
                }
                _ => {}
            }
        }

        let mut unbound: HashSet<String> = HashSet::new();
        let mut bound: HashSet<(String, String, bool)> = HashSet::new();
        for decl in declarations {
            match decl {
                Declaration::Entity(d) => {
                    let full = decl.full_name();
                    if !d.bindings.is_empty() && d.entity_set.is_none() && d.singleton.is_none() {
                        self.violation(
                            "invalid-binding",
                            format!("'{full}' declares navigation bindings but no entity set"),
                        );
                    }
                    let navigation = self.flatten_navigation(&full);
                    for binding in &d.bindings {
                        let Some(nav) = navigation.iter().find(|n| n.name == binding.path) else {
                            self.violation(
                                "invalid-binding",
                                format!("binding path '{}' is not a navigation property of '{full}'", binding.path),
                            );
                            continue;
                        };
                        match sets.get(&binding.target) {
                            None => self.violation(
                                "invalid-binding",
                                format!("binding target '{}' is not an entity set or singleton", binding.target),
                            ),
                            Some(target_type) if !self.is_derived_from(target_type, &nav.target) => {
                                self.violation(
                                    "invalid-binding",
                                    format!(
                                        "binding target '{}' holds '{target_type}', not '{}'",
                                        binding.target, nav.target
                                    ),
                                )
                            }
                            Some(_) => {}
                        }
                    }
                }
                Declaration::Operation(d) => {
                    let full = decl.full_name();
                    let fresh = if d.bound {
                        d.parameters.first().is_none_or(|b| {
                            bound.insert((full.clone(), b.type_name.clone(), b.collection))
                        })
                    } else {
                        unbound.insert(full.clone())
                    };
                    if !fresh {
                        self.violation(
                            "duplicate-operation",
                            format!("operation '{full}' has conflicting overloads"),
                        );
                    }
                    if let Some(set) = &d.import_entity_set {
                        if !sets.contains_key(set) {
                            self.violation(
                                "invalid-import",
                                format!("import of '{full}' names unknown entity set '{set}'"),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ── Assembly ─────────────────────────────────────────────────

    fn assemble(&self, container_name: &str, declarations: &[Declaration]) -> EntityDataModel {
        let mut types: BTreeMap<String, EdmType> = BTreeMap::new();
        for kind in PrimitiveKind::ALL {
            types.insert(kind.edm_name().to_string(), EdmType::Primitive(kind));
        }
        for a in AbstractType::ALL {
            types.insert(a.edm_name().to_string(), EdmType::Abstract(a));
        }

        let mut schemas: Vec<Schema> = Vec::new();
        let mut tags = HashMap::new();
        let mut operations: BTreeMap<String, Vec<Operation>> = BTreeMap::new();
        let mut container = EntityContainer {
            name: container_name.to_string(),
            ..Default::default()
        };

        for decl in declarations {
            let full = decl.full_name();
            let name = QualifiedName::new(decl.namespace(), decl.name());
            let schema_index = match schemas.iter().position(|s| s.namespace == decl.namespace()) {
                Some(i) => i,
                None => {
                    schemas.push(Schema {
                        namespace: decl.namespace().to_string(),
                        types: Vec::new(),
                        operations: Vec::new(),
                    });
                    schemas.len() - 1
                }
            };
            let tag = decl.tag().unwrap_or_else(|| full.clone());

            let edm_type = match decl {
                Declaration::Entity(d) => {
                    if let Some(set) = &d.entity_set {
                        container.entity_sets.push(EntitySet {
                            name: set.clone(),
                            entity_type: full.clone(),
                            navigation_bindings: d.bindings.clone(),
                        });
                    }
                    if let Some(singleton) = &d.singleton {
                        container.singletons.push(Singleton {
                            name: singleton.clone(),
                            entity_type: full.clone(),
                        });
                    }
                    EdmType::Entity(EntityType {
                        name,
                        tag: tag.clone(),
                        base_type: d.base_type.clone(),
                        properties: self.flatten_properties(&full),
                        navigation: self.flatten_navigation(&full),
                        keys: self.declared_keys(&full).map(<[String]>::to_vec).unwrap_or_default(),
                        is_abstract: d.is_abstract,
                        is_open: d.is_open,
                        has_stream: d.has_stream,
                    })
                }
                Declaration::Complex(d) => EdmType::Complex(ComplexType {
                    name,
                    tag: tag.clone(),
                    base_type: d.base_type.clone(),
                    properties: self.flatten_properties(&full),
                    is_abstract: d.is_abstract,
                    is_open: d.is_open,
                }),
                Declaration::Enum(d) => EdmType::Enum(EnumType {
                    name,
                    tag: tag.clone(),
                    underlying: PrimitiveKind::from_edm_name(&d.underlying)
                        .unwrap_or(PrimitiveKind::Int32),
                    members: Self::enum_members(d),
                    is_flags: d.flags,
                }),
                Declaration::TypeDefinition(d) => EdmType::TypeDefinition(TypeDefinition {
                    name,
                    tag: tag.clone(),
                    underlying: PrimitiveKind::from_edm_name(&d.underlying)
                        .unwrap_or(PrimitiveKind::String),
                    max_length: d.max_length,
                }),
                Declaration::Operation(d) => {
                    let operation = Operation {
                        name,
                        kind: d.operation,
                        is_bound: d.bound,
                        parameters: d
                            .parameters
                            .iter()
                            .map(|p| Parameter {
                                name: p.name.clone(),
                                type_ref: p.type_ref(),
                            })
                            .collect(),
                        return_type: d.returns.as_ref().map(|r| r.type_ref()),
                        is_composable: d.composable,
                    };
                    if let Some(import) = &d.import {
                        let entry = OperationImport {
                            name: import.clone(),
                            operation: full.clone(),
                            entity_set: d.import_entity_set.clone(),
                        };
                        match d.operation {
                            OperationKind::Action => container.action_imports.push(entry),
                            OperationKind::Function => container.function_imports.push(entry),
                        }
                    }
                    let schema = &mut schemas[schema_index];
                    if !schema.operations.contains(&full) {
                        schema.operations.push(full.clone());
                    }
                    operations.entry(full).or_default().push(operation);
                    continue;
                }
            };
            schemas[schema_index].types.push(full.clone());
            tags.insert(tag, full.clone());
            types.insert(full, edm_type);
        }

        EntityDataModel {
            schemas,
            types,
            tags,
            operations,
            container,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::definition::*;

    fn customer() -> EntityDeclaration {
        EntityDeclaration::new("Demo", "Customer")
            .with_key("Id", "Edm.String")
            .with_property(PropertyDeclaration::new("Name", "Edm.String"))
            .with_navigation(NavigationDeclaration::many("Orders", "Demo.Order").with_partner("Customer"))
            .in_entity_set("Customers")
    }

    fn order() -> EntityDeclaration {
        EntityDeclaration::new("Demo", "Order")
            .with_key("Id", "Edm.Int32")
            .with_navigation(NavigationDeclaration::single("Customer", "Demo.Customer").with_partner("Orders"))
            .in_entity_set("Orders")
            .with_binding("Customer", "Customers")
    }

    fn rules(err: MetadataError) -> Vec<String> {
        let MetadataError::Inconsistent { violations } = err;
        violations.into_iter().map(|v| v.rule).collect()
    }

    #[test]
    fn builds_consistent_model() {
        let model = build_model("Container", &[customer().into(), order().into()]).unwrap();
        assert!(model.entity_type("Demo.Customer").is_some());
        assert_eq!(model.entity_set("Orders").unwrap().entity_type, "Demo.Order");
        assert_eq!(model.container().name, "Container");
        assert_eq!(model.schemas().len(), 1);
        assert!(model.get_type("Edm.Int32").is_some());
        assert_eq!(
            model.get_type_by_tag("Demo.Customer"),
            model.get_type("Demo.Customer")
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = build_model("C", &[customer().into(), customer().into()]).unwrap_err();
        assert!(rules(err).contains(&"duplicate-name".to_string()));
    }

    #[test]
    fn dangling_navigation_is_rejected() {
        let err = build_model("C", &[customer().into()]).unwrap_err();
        assert!(rules(err).contains(&"dangling-navigation".to_string()));
    }

    #[test]
    fn nullable_key_is_rejected() {
        let decl = EntityDeclaration::new("Demo", "Thing")
            .with_key_property(PropertyDeclaration::new("Id", "Edm.Int32"));
        let err = build_model("C", &[decl.into()]).unwrap_err();
        assert_eq!(rules(err), vec!["malformed-key"]);
    }

    #[test]
    fn missing_key_is_rejected_unless_abstract() {
        let err = build_model("C", &[EntityDeclaration::new("Demo", "Thing").into()]).unwrap_err();
        assert_eq!(rules(err), vec!["missing-key"]);

        let ok = build_model("C", &[EntityDeclaration::new("Demo", "Thing").abstract_type().into()]);
        assert!(ok.is_ok());
    }

    #[test]
    fn derived_type_inherits_keys_and_properties() {
        let base = EntityDeclaration::new("Demo", "Person")
            .with_key("Id", "Edm.Int32")
            .with_property(PropertyDeclaration::new("Name", "Edm.String"))
            .in_entity_set("People");
        let derived = EntityDeclaration::new("Demo", "Employee")
            .derived_from("Demo.Person")
            .with_property(PropertyDeclaration::new("Salary", "Edm.Decimal"));
        let model = build_model("C", &[base.into(), derived.into()]).unwrap();
        let employee = model.entity_type("Demo.Employee").unwrap();
        assert_eq!(employee.keys, vec!["Id"]);
        let names: Vec<_> = employee.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Name", "Salary"]);
        assert_eq!(employee.properties[0].declared_by, "Demo.Person");
        assert!(model.is_derived_from("Demo.Employee", "Demo.Person"));
    }

    #[test]
    fn derived_type_cannot_redeclare_key() {
        let base = EntityDeclaration::new("Demo", "Person").with_key("Id", "Edm.Int32");
        let derived = EntityDeclaration::new("Demo", "Employee")
            .derived_from("Demo.Person")
            .with_key("Badge", "Edm.Int32");
        let err = build_model("C", &[base.into(), derived.into()]).unwrap_err();
        assert_eq!(rules(err), vec!["malformed-key"]);
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let a = ComplexDeclaration::new("Demo", "A").derived_from("Demo.B");
        let b = ComplexDeclaration::new("Demo", "B").derived_from("Demo.A");
        let err = build_model("C", &[a.into(), b.into()]).unwrap_err();
        assert!(rules(err).iter().all(|r| r == "inheritance-cycle"));
    }

    #[test]
    fn all_violations_are_reported_together() {
        let bad = EntityDeclaration::new("Demo", "Bad")
            .with_property(PropertyDeclaration::new("X", "Demo.Nope"))
            .with_navigation(NavigationDeclaration::single("Y", "Demo.Missing"));
        let err = build_model("C", &[bad.into()]).unwrap_err();
        let rules = rules(err);
        assert!(rules.contains(&"unresolved-type".to_string()));
        assert!(rules.contains(&"dangling-navigation".to_string()));
        assert!(rules.contains(&"missing-key".to_string()));
    }

    #[test]
    fn binding_target_must_exist() {
        let order = order().with_binding("Customer", "Nowhere");
        let err = build_model("C", &[customer().into(), order.into()]).unwrap_err();
        assert_eq!(rules(err), vec!["invalid-binding"]);
    }

    #[test]
    fn function_without_return_type_is_rejected() {
        let f = OperationDeclaration::function("Demo", "Nothing");
        let err = build_model("C", &[f.into()]).unwrap_err();
        assert_eq!(rules(err), vec!["missing-return-type"]);
    }

    #[test]
    fn operations_and_imports_are_assembled() {
        let top = OperationDeclaration::function("Demo", "TopCustomers")
            .returning("Demo.Customer", true)
            .imported_as("TopCustomers");
        let total = OperationDeclaration::function("Demo", "Total")
            .bound_to("Demo.Order", false)
            .returning("Edm.Decimal", false);
        let model = build_model(
            "C",
            &[customer().into(), order().into(), top.into(), total.into()],
        )
        .unwrap();
        assert_eq!(
            model.function_import("TopCustomers").unwrap().operation,
            "Demo.TopCustomers"
        );
        assert!(model.bound_operation("Demo.Total", "Demo.Order", false).is_some());
        assert!(model.bound_operation("Demo.Total", "Demo.Order", true).is_none());
    }

    #[test]
    fn enum_values_count_up() {
        let mut color = EnumDeclaration::new("Demo", "Color", &["Red", "Green", "Blue"]);
        color.members[1].value = Some(10);
        let model = build_model("C", &[color.into()]).unwrap();
        let color = model.enum_type("Demo.Color").unwrap();
        let values: Vec<_> = color.members.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0, 10, 11]);
    }

    #[test]
    fn building_is_idempotent() {
        let decls: Vec<Declaration> = vec![customer().into(), order().into()];
        let a = build_model("C", &decls).unwrap();
        let b = build_model("C", &decls).unwrap();
        assert_eq!(a, b);
    }
}
