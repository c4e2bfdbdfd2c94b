//! Service document (JSON) and `$metadata` (CSDL XML).

use std::fmt::Write;

use serde_json::json;

use super::{accepts, context_url, APPLICATION_JSON, APPLICATION_XML};
use crate::edm::{EdmType, EntityDataModel, StructuralProperty, TypeRef};
use crate::error::ODataError;
use crate::negotiation::{Renderer, RequestContext};
use crate::request::ODataResponse;
use crate::result::{QueryResult, ResultData};
use crate::uri::ast::RelativeUri;

pub struct ServiceDocumentRenderer;

impl Renderer for ServiceDocumentRenderer {
    fn name(&self) -> &'static str {
        "service-document"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        match (ctx.relative(), &result.data) {
            (Some(RelativeUri::ServiceDocument { .. }), ResultData::Nothing) => {
                accepts(ctx, APPLICATION_JSON)
            }
            _ => 0,
        }
    }

    fn render(&self, ctx: &RequestContext, _result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let container = ctx.model.container();
        let mut value = Vec::new();
        for set in &container.entity_sets {
            value.push(json!({"name": set.name, "kind": "EntitySet", "url": set.name}));
        }
        for singleton in &container.singletons {
            value.push(json!({"name": singleton.name, "kind": "Singleton", "url": singleton.name}));
        }
        for import in &container.function_imports {
            value.push(json!({"name": import.name, "kind": "FunctionImport", "url": import.name}));
        }
        let body = json!({
            "@odata.context": context_url(ctx, None),
            "value": value,
        });
        Ok(ODataResponse::new(200, APPLICATION_JSON, body.to_string()))
    }
}

pub struct MetadataRenderer;

impl Renderer for MetadataRenderer {
    fn name(&self) -> &'static str {
        "csdl-metadata"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        match (ctx.relative(), &result.data) {
            (Some(RelativeUri::Metadata { .. }), ResultData::Nothing) => accepts(ctx, APPLICATION_XML),
            _ => 0,
        }
    }

    fn render(&self, ctx: &RequestContext, _result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let xml = csdl_xml(&ctx.model).map_err(|e| ODataError::Internal(e.into()))?;
        Ok(ODataResponse::new(200, APPLICATION_XML, xml))
    }
}

/// Render the model as a CSDL 4.0 document.
pub fn csdl_xml(model: &EntityDataModel) -> Result<String, std::fmt::Error> {
    let mut xml = String::new();
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        xml,
        r#"<edmx:Edmx xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx" Version="4.0">"#
    )?;
    writeln!(xml, "  <edmx:DataServices>")?;

    let container = model.container();
    let schemas = model.schemas();
    for (i, schema) in schemas.iter().enumerate() {
        writeln!(
            xml,
            r#"    <Schema xmlns="http://docs.oasis-open.org/odata/ns/edm" Namespace="{}">"#,
            xml_escape(&schema.namespace)
        )?;
        for name in &schema.types {
            if let Some(ty) = model.get_type(name) {
                write_type(&mut xml, ty)?;
            }
        }
        for name in &schema.operations {
            for op in model.operations(name) {
                let element = match op.kind {
                    crate::edm::OperationKind::Action => "Action",
                    crate::edm::OperationKind::Function => "Function",
                };
                let mut attrs = format!(r#"Name="{}""#, xml_escape(&op.name.name));
                if op.is_bound {
                    attrs.push_str(r#" IsBound="true""#);
                }
                if op.is_composable {
                    attrs.push_str(r#" IsComposable="true""#);
                }
                writeln!(xml, "      <{element} {attrs}>")?;
                for p in &op.parameters {
                    writeln!(
                        xml,
                        r#"        <Parameter Name="{}" {}/>"#,
                        xml_escape(&p.name),
                        type_attrs(&p.type_ref)?
                    )?;
                }
                if let Some(ret) = &op.return_type {
                    writeln!(xml, "        <ReturnType {}/>", type_attrs(ret)?)?;
                }
                writeln!(xml, "      </{element}>")?;
            }
        }
        // The container goes into the last schema.
        if i + 1 == schemas.len() {
            write_container(&mut xml, model)?;
        }
        writeln!(xml, "    </Schema>")?;
    }
    if schemas.is_empty() && !container.name.is_empty() {
        writeln!(
            xml,
            r#"    <Schema xmlns="http://docs.oasis-open.org/odata/ns/edm" Namespace="Default">"#
        )?;
        write_container(&mut xml, model)?;
        writeln!(xml, "    </Schema>")?;
    }

    writeln!(xml, "  </edmx:DataServices>")?;
    writeln!(xml, "</edmx:Edmx>")?;
    Ok(xml)
}

fn write_type(xml: &mut String, ty: &EdmType) -> std::fmt::Result {
    match ty {
        EdmType::Entity(t) => {
            let own = t.name.full();
            let mut attrs = format!(r#"Name="{}""#, xml_escape(&t.name.name));
            if let Some(base) = &t.base_type {
                write!(attrs, r#" BaseType="{}""#, xml_escape(base))?;
            }
            if t.is_abstract {
                attrs.push_str(r#" Abstract="true""#);
            }
            if t.is_open {
                attrs.push_str(r#" OpenType="true""#);
            }
            if t.has_stream {
                attrs.push_str(r#" HasStream="true""#);
            }
            writeln!(xml, "      <EntityType {attrs}>")?;
            if t.base_type.is_none() && !t.keys.is_empty() {
                writeln!(xml, "        <Key>")?;
                for key in &t.keys {
                    writeln!(xml, r#"          <PropertyRef Name="{}"/>"#, xml_escape(key))?;
                }
                writeln!(xml, "        </Key>")?;
            }
            write_properties(xml, &t.properties, &own)?;
            for nav in t.navigation.iter().filter(|n| n.declared_by == own) {
                let type_name = if nav.collection {
                    format!("Collection({})", nav.target)
                } else {
                    nav.target.clone()
                };
                let mut attrs = format!(
                    r#"Name="{}" Type="{}""#,
                    xml_escape(&nav.name),
                    xml_escape(&type_name)
                );
                if !nav.collection && !nav.nullable {
                    attrs.push_str(r#" Nullable="false""#);
                }
                if let Some(partner) = &nav.partner {
                    write!(attrs, r#" Partner="{}""#, xml_escape(partner))?;
                }
                writeln!(xml, "        <NavigationProperty {attrs}/>")?;
            }
            writeln!(xml, "      </EntityType>")
        }
        EdmType::Complex(t) => {
            let own = t.name.full();
            let mut attrs = format!(r#"Name="{}""#, xml_escape(&t.name.name));
            if let Some(base) = &t.base_type {
                write!(attrs, r#" BaseType="{}""#, xml_escape(base))?;
            }
            if t.is_abstract {
                attrs.push_str(r#" Abstract="true""#);
            }
            if t.is_open {
                attrs.push_str(r#" OpenType="true""#);
            }
            writeln!(xml, "      <ComplexType {attrs}>")?;
            write_properties(xml, &t.properties, &own)?;
            writeln!(xml, "      </ComplexType>")
        }
        EdmType::Enum(t) => {
            writeln!(
                xml,
                r#"      <EnumType Name="{}" UnderlyingType="{}"{}>"#,
                xml_escape(&t.name.name),
                t.underlying.edm_name(),
                if t.is_flags { r#" IsFlags="true""# } else { "" }
            )?;
            for m in &t.members {
                writeln!(xml, r#"        <Member Name="{}" Value="{}"/>"#, xml_escape(&m.name), m.value)?;
            }
            writeln!(xml, "      </EnumType>")
        }
        EdmType::TypeDefinition(t) => {
            let max = t
                .max_length
                .map(|n| format!(r#" MaxLength="{n}""#))
                .unwrap_or_default();
            writeln!(
                xml,
                r#"      <TypeDefinition Name="{}" UnderlyingType="{}"{max}/>"#,
                xml_escape(&t.name.name),
                t.underlying.edm_name()
            )
        }
        EdmType::Primitive(_) | EdmType::Abstract(_) => Ok(()),
    }
}

fn write_properties(xml: &mut String, properties: &[StructuralProperty], own: &str) -> std::fmt::Result {
    for p in properties.iter().filter(|p| p.declared_by == own) {
        writeln!(
            xml,
            r#"        <Property Name="{}" {}/>"#,
            xml_escape(&p.name),
            type_attrs(&p.type_ref)?
        )?;
    }
    Ok(())
}

fn type_attrs(type_ref: &TypeRef) -> Result<String, std::fmt::Error> {
    let mut attrs = format!(r#"Type="{}""#, xml_escape(&type_ref.display_name()));
    if !type_ref.nullable {
        attrs.push_str(r#" Nullable="false""#);
    }
    if let Some(n) = type_ref.max_length {
        write!(attrs, r#" MaxLength="{n}""#)?;
    }
    if let Some(n) = type_ref.precision {
        write!(attrs, r#" Precision="{n}""#)?;
    }
    if let Some(n) = type_ref.scale {
        write!(attrs, r#" Scale="{n}""#)?;
    }
    Ok(attrs)
}

fn write_container(xml: &mut String, model: &EntityDataModel) -> std::fmt::Result {
    let container = model.container();
    writeln!(xml, r#"      <EntityContainer Name="{}">"#, xml_escape(&container.name))?;
    for set in &container.entity_sets {
        if set.navigation_bindings.is_empty() {
            writeln!(
                xml,
                r#"        <EntitySet Name="{}" EntityType="{}"/>"#,
                xml_escape(&set.name),
                xml_escape(&set.entity_type)
            )?;
            continue;
        }
        writeln!(
            xml,
            r#"        <EntitySet Name="{}" EntityType="{}">"#,
            xml_escape(&set.name),
            xml_escape(&set.entity_type)
        )?;
        for binding in &set.navigation_bindings {
            writeln!(
                xml,
                r#"          <NavigationPropertyBinding Path="{}" Target="{}"/>"#,
                xml_escape(&binding.path),
                xml_escape(&binding.target)
            )?;
        }
        writeln!(xml, "        </EntitySet>")?;
    }
    for singleton in &container.singletons {
        writeln!(
            xml,
            r#"        <Singleton Name="{}" Type="{}"/>"#,
            xml_escape(&singleton.name),
            xml_escape(&singleton.entity_type)
        )?;
    }
    for (element, attr, imports) in [
        ("ActionImport", "Action", &container.action_imports),
        ("FunctionImport", "Function", &container.function_imports),
    ] {
        for import in imports {
            let set = import
                .entity_set
                .as_ref()
                .map(|s| format!(r#" EntitySet="{}""#, xml_escape(s)))
                .unwrap_or_default();
            writeln!(
                xml,
                r#"        <{element} Name="{}" {attr}="{}"{set}/>"#,
                xml_escape(&import.name),
                xml_escape(&import.operation)
            )?;
        }
    }
    writeln!(xml, "      </EntityContainer>")
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::{
        build_model, Declaration, EntityDeclaration, EnumDeclaration, NavigationDeclaration,
        OperationDeclaration, PropertyDeclaration,
    };

    fn model() -> EntityDataModel {
        build_model(
            "Container",
            &[
                Declaration::Enum(EnumDeclaration::new("Demo", "Tier", &["Basic", "Gold"])),
                Declaration::Entity(
                    EntityDeclaration::new("Demo", "Customer")
                        .with_key("Id", "Edm.String")
                        .with_property(PropertyDeclaration::new("Name", "Edm.String").max_length(40))
                        .with_property(PropertyDeclaration::new("Tier", "Demo.Tier"))
                        .with_navigation(NavigationDeclaration::many("Orders", "Demo.Order"))
                        .in_entity_set("Customers")
                        .with_binding("Orders", "Orders"),
                ),
                Declaration::Entity(
                    EntityDeclaration::new("Demo", "Order")
                        .with_key("Id", "Edm.Int32")
                        .in_entity_set("Orders"),
                ),
                Declaration::Operation(
                    OperationDeclaration::function("Demo", "TopCustomers")
                        .returning("Demo.Customer", true)
                        .imported_as("TopCustomers")
                        .returning_from("Customers"),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn csdl_lists_types_and_container() {
        let xml = csdl_xml(&model()).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<Schema xmlns="http://docs.oasis-open.org/odata/ns/edm" Namespace="Demo">"#));
        assert!(xml.contains(r#"<EnumType Name="Tier" UnderlyingType="Edm.Int32">"#));
        assert!(xml.contains(r#"<PropertyRef Name="Id"/>"#));
        assert!(xml.contains(r#"<Property Name="Name" Type="Edm.String" MaxLength="40"/>"#));
        assert!(xml.contains(r#"<NavigationProperty Name="Orders" Type="Collection(Demo.Order)"/>"#));
        assert!(xml.contains(r#"<NavigationPropertyBinding Path="Orders" Target="Orders"/>"#));
        assert!(xml.contains(r#"<FunctionImport Name="TopCustomers" Function="Demo.TopCustomers" EntitySet="Customers"/>"#));
        assert!(xml.trim_end().ends_with("</edmx:Edmx>"));
    }

    #[test]
    fn escapes_attribute_text() {
        assert_eq!(xml_escape(r#"a<b & "c">"#), "a&lt;b &amp; &quot;c&quot;&gt;");
    }
}
