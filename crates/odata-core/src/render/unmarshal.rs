//! JSON request bodies.

use serde_json::{Map, Value};

use super::{body_is, APPLICATION_JSON};
use crate::edm::{EdmType, EntityDataModel, OperationKind, PrimitiveKind, TypeRef};
use crate::error::ODataError;
use crate::negotiation::{RequestContext, Unmarshaller};
use crate::processor::RequestBody;
use crate::uri::ast::{PathSegment, TargetKind};

fn parse_object(body: &str) -> Result<Map<String, Value>, ODataError> {
    if body.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ODataError::invalid_body("expected a JSON object")),
        Err(e) => Err(ODataError::invalid_body(format!("malformed JSON: {e}"))),
    }
}

/// `{"@odata.id": "..."}` for `$ref` writes.
pub struct JsonReferenceUnmarshaller;

impl Unmarshaller for JsonReferenceUnmarshaller {
    fn name(&self) -> &'static str {
        "json-reference"
    }

    fn score(&self, ctx: &RequestContext, _body: &str) -> u32 {
        let is_ref = ctx.target().is_some_and(|t| t.kind == TargetKind::Reference);
        if is_ref && body_is(ctx, APPLICATION_JSON) {
            10
        } else {
            0
        }
    }

    fn unmarshal(&self, _ctx: &RequestContext, body: &str) -> Result<RequestBody, ODataError> {
        let object = parse_object(body)?;
        match object.get("@odata.id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(RequestBody::Reference(id.clone())),
            _ => Err(ODataError::invalid_property(
                "@odata.id",
                "a reference body needs a non-empty @odata.id",
            )),
        }
    }
}

/// Action parameters, checked against the action's declaration.
pub struct JsonParametersUnmarshaller;

impl JsonParametersUnmarshaller {
    fn action(ctx: &RequestContext) -> Option<&str> {
        let resource = ctx.uri.as_ref()?.resource_path()?;
        match resource.path.last()? {
            PathSegment::Operation {
                operation,
                kind: OperationKind::Action,
                ..
            } => Some(operation.as_str()),
            _ => None,
        }
    }
}

impl Unmarshaller for JsonParametersUnmarshaller {
    fn name(&self) -> &'static str {
        "json-parameters"
    }

    fn score(&self, ctx: &RequestContext, body: &str) -> u32 {
        if Self::action(ctx).is_none() {
            return 0;
        }
        if body_is(ctx, APPLICATION_JSON) || body.trim().is_empty() {
            10
        } else {
            0
        }
    }

    fn unmarshal(&self, ctx: &RequestContext, body: &str) -> Result<RequestBody, ODataError> {
        let object = parse_object(body)?;
        let name = Self::action(ctx).unwrap_or_default();
        let Some(action) = ctx.model.operations(name).first() else {
            return Ok(RequestBody::Parameters(object));
        };
        let declared = action.call_parameters();
        for (key, value) in &object {
            let param = declared.iter().find(|p| &p.name == key).ok_or_else(|| {
                ODataError::invalid_property(key, format!("action {name} has no parameter '{key}'"))
            })?;
            check_value(&ctx.model, key, &param.type_ref, value)?;
        }
        for param in declared {
            if !param.type_ref.nullable && !object.contains_key(&param.name) {
                return Err(ODataError::invalid_property(
                    &param.name,
                    format!("missing parameter '{}'", param.name),
                ));
            }
        }
        Ok(RequestBody::Parameters(object))
    }
}

/// Entity payloads for create and update.
///
/// Unknown properties are rejected unless the type is open.
pub struct JsonEntityUnmarshaller;

impl Unmarshaller for JsonEntityUnmarshaller {
    fn name(&self) -> &'static str {
        "json-entity"
    }

    fn score(&self, ctx: &RequestContext, _body: &str) -> u32 {
        let entity_target = ctx
            .target()
            .is_some_and(|t| matches!(t.kind, TargetKind::Entity | TargetKind::EntityCollection));
        if entity_target && body_is(ctx, APPLICATION_JSON) {
            10
        } else {
            0
        }
    }

    fn unmarshal(&self, ctx: &RequestContext, body: &str) -> Result<RequestBody, ODataError> {
        let object = parse_object(body)?;
        let declared = ctx
            .target()
            .and_then(|t| t.type_name.clone())
            .unwrap_or_default();
        let type_name = match object.get("@odata.type") {
            Some(Value::String(t)) => {
                let t = t.trim_start_matches('#').to_string();
                if !ctx.model.is_derived_from(&t, &declared) {
                    return Err(ODataError::invalid_property(
                        "@odata.type",
                        format!("{t} is not {declared} or derived from it"),
                    ));
                }
                t
            }
            _ => declared,
        };
        let Some(entity) = ctx.model.entity_type(&type_name) else {
            return Err(ODataError::invalid_body(format!("{type_name} is not an entity type")));
        };
        for (key, value) in &object {
            if let Some((nav, annotation)) = key.split_once('@') {
                if !nav.is_empty()
                    && annotation == "odata.bind"
                    && ctx.model.navigation_property(&type_name, nav).is_none()
                {
                    return Err(ODataError::invalid_property(
                        nav,
                        format!("{type_name} has no navigation property '{nav}'"),
                    ));
                }
                continue;
            }
            if let Some(property) = ctx.model.structural_property(&type_name, key) {
                check_value(&ctx.model, key, &property.type_ref, value)?;
            } else if ctx.model.navigation_property(&type_name, key).is_some() {
                // deep insert; shape is up to the data source
            } else if !entity.is_open {
                return Err(ODataError::invalid_property(
                    key,
                    format!("{type_name} has no property '{key}'"),
                ));
            }
        }
        Ok(RequestBody::Entity(object))
    }
}

fn check_value(
    model: &EntityDataModel,
    name: &str,
    type_ref: &TypeRef,
    value: &Value,
) -> Result<(), ODataError> {
    if value.is_null() {
        return if type_ref.nullable {
            Ok(())
        } else {
            Err(ODataError::invalid_property(name, format!("'{name}' may not be null")))
        };
    }
    if type_ref.collection {
        let Value::Array(items) = value else {
            return Err(ODataError::invalid_property(name, format!("'{name}' must be an array")));
        };
        let element = TypeRef {
            collection: false,
            nullable: true,
            ..type_ref.clone()
        };
        return items
            .iter()
            .try_for_each(|item| check_value(model, name, &element, item));
    }
    let ok = match model.get_type(&type_ref.type_name) {
        Some(EdmType::Complex(_)) => value.is_object(),
        Some(EdmType::Enum(t)) => match value {
            Value::String(s) => s.split(',').all(|m| t.member(m.trim()).is_some()),
            Value::Number(n) => n.is_i64(),
            _ => false,
        },
        _ => match model.primitive_kind(&type_ref.type_name) {
            Some(kind) => primitive_matches(kind, type_ref, value),
            None => true,
        },
    };
    if ok {
        Ok(())
    } else {
        Err(ODataError::invalid_property(
            name,
            format!("'{name}' is not a valid {}", type_ref.type_name),
        ))
    }
}

fn primitive_matches(kind: PrimitiveKind, type_ref: &TypeRef, value: &Value) -> bool {
    use PrimitiveKind::*;
    match kind {
        Boolean => value.is_boolean(),
        Byte | SByte | Int16 | Int32 | Int64 => match (value.as_i64(), kind.integer_range()) {
            (Some(n), Some((lo, hi))) => (lo..=hi).contains(&n),
            _ => false,
        },
        Single | Double => value.is_number() || value.as_str().is_some_and(|s| matches!(s, "NaN" | "INF" | "-INF")),
        Decimal => value.is_number() || value.as_str().is_some_and(|s| s.parse::<rust_decimal::Decimal>().is_ok()),
        String => value.as_str().is_some_and(|s| {
            type_ref
                .max_length
                .is_none_or(|max| s.chars().count() <= max as usize)
        }),
        Guid => value.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
        Date => value
            .as_str()
            .is_some_and(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        DateTimeOffset => value
            .as_str()
            .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
        TimeOfDay => value
            .as_str()
            .is_some_and(|s| chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()),
        Binary | Duration => value.is_string(),
    }
}
