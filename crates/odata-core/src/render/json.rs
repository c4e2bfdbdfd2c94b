//! JSON payloads, raw values and streamed collections.

use serde_json::{json, Map, Value};

use super::{accepts, context_url, APPLICATION_JSON, TEXT_PLAIN};
use crate::error::ODataError;
use crate::negotiation::{ChunkedActionRenderResult, ChunkedRenderer, Renderer, RequestContext};
use crate::request::ODataResponse;
use crate::result::{entity_path, QueryResult, ResultData};
use crate::uri::ast::{RelativeUri, TargetKind};

const OCTET_STREAM: &str = "application/octet-stream";

/// Context URL fragment for a result.
fn fragment(result: &QueryResult, kind: Option<TargetKind>) -> Option<String> {
    let set = result.entity_set.as_deref();
    let type_name = result.type_name.as_deref();
    match (&result.data, kind) {
        (ResultData::Collection(_), Some(TargetKind::Reference)) => Some("Collection($ref)".into()),
        (_, Some(TargetKind::Reference)) => Some("$ref".into()),
        (ResultData::Collection(_), _) => set
            .map(str::to_string)
            .or_else(|| type_name.map(|t| format!("Collection({t})"))),
        (ResultData::Entity(_), _) => set
            .map(|s| format!("{s}/$entity"))
            .or_else(|| type_name.map(str::to_string)),
        (ResultData::Value(v), _) if v.is_array() => type_name.map(|t| format!("Collection({t})")),
        _ => type_name.map(str::to_string),
    }
}

/// Entity, collection, property and `$ref` payloads.
pub struct JsonRenderer;

impl JsonRenderer {
    fn reference(ctx: &RequestContext, result: &QueryResult, entity: &Value) -> Result<Value, ODataError> {
        let set = result.entity_set.as_deref().unwrap_or_default();
        let path = entity_path(&ctx.model, set, entity).ok_or_else(|| {
            ODataError::Internal(anyhow::anyhow!("cannot build an entity id for {set}: key values missing"))
        })?;
        Ok(json!({ "@odata.id": format!("{}/{path}", ctx.service_root.trim_end_matches('/')) }))
    }
}

impl Renderer for JsonRenderer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        if !matches!(
            result.data,
            ResultData::Collection(_) | ResultData::Entity(_) | ResultData::Value(_)
        ) {
            return 0;
        }
        let handled = match ctx.relative() {
            Some(RelativeUri::EntityId { .. }) => true,
            Some(RelativeUri::ResourcePath(r)) => {
                !matches!(r.target.kind, TargetKind::Count | TargetKind::RawValue)
            }
            _ => false,
        };
        if handled {
            accepts(ctx, APPLICATION_JSON)
        } else {
            0
        }
    }

    fn render(&self, ctx: &RequestContext, result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let kind = ctx.target().map(|t| t.kind);
        let mut body = Map::new();
        if let Some(fragment) = fragment(result, kind) {
            body.insert("@odata.context".into(), Value::String(context_url(ctx, Some(&fragment))));
        }
        let references = kind == Some(TargetKind::Reference);
        match &result.data {
            ResultData::Collection(items) => {
                if let Some(count) = result.count() {
                    body.insert("@odata.count".into(), Value::from(count));
                }
                let items = if references {
                    items
                        .iter()
                        .map(|item| Self::reference(ctx, result, item))
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    items.clone()
                };
                body.insert("value".into(), Value::Array(items));
                if let Some(link) = result.next_link() {
                    body.insert("@odata.nextLink".into(), Value::String(link.to_string()));
                }
            }
            ResultData::Entity(entity) if references => {
                if let Value::Object(reference) = Self::reference(ctx, result, entity)? {
                    body.extend(reference);
                }
            }
            ResultData::Entity(Value::Object(properties)) => {
                body.extend(properties.clone());
            }
            ResultData::Value(Value::Object(properties)) if kind == Some(TargetKind::Complex) => {
                body.extend(properties.clone());
            }
            ResultData::Entity(value) | ResultData::Value(value) => {
                body.insert("value".into(), value.clone());
            }
            ResultData::Nothing | ResultData::Fault(_) => {
                return Err(ODataError::Internal(anyhow::anyhow!(
                    "json renderer asked to render an empty result"
                )));
            }
        }
        Ok(ODataResponse::new(200, APPLICATION_JSON, Value::Object(body).to_string()))
    }
}

/// Bare `$count` and `$value` bodies.
pub struct RawValueRenderer;

impl RawValueRenderer {
    fn media(ctx: &RequestContext) -> Option<&'static str> {
        let target = ctx.target()?;
        match target.kind {
            TargetKind::Count => Some(TEXT_PLAIN),
            TargetKind::RawValue => {
                let is_media_entity = target
                    .type_name
                    .as_deref()
                    .is_some_and(|t| ctx.model.entity_type(t).is_some());
                Some(if is_media_entity { OCTET_STREAM } else { TEXT_PLAIN })
            }
            _ => None,
        }
    }
}

impl Renderer for RawValueRenderer {
    fn name(&self) -> &'static str {
        "raw-value"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        match (Self::media(ctx), &result.data) {
            (Some(media), ResultData::Value(_)) => accepts(ctx, media),
            _ => 0,
        }
    }

    fn render(&self, ctx: &RequestContext, result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let media = Self::media(ctx).unwrap_or(TEXT_PLAIN);
        match &result.data {
            ResultData::Value(Value::Null) => Ok(ODataResponse::no_content()),
            ResultData::Value(Value::String(s)) => Ok(ODataResponse::new(200, media, s.clone())),
            ResultData::Value(other) => Ok(ODataResponse::new(200, media, other.to_string())),
            _ => Err(ODataError::Internal(anyhow::anyhow!(
                "raw-value renderer asked to render a non-value"
            ))),
        }
    }
}

/// Streams a collection as `{"@odata.context":...,"value":[` items `]}`.
///
/// Chosen only when the client sends `Prefer: odata.streaming`.
pub struct JsonCollectionStreamRenderer;

impl ChunkedRenderer for JsonCollectionStreamRenderer {
    fn name(&self) -> &'static str {
        "json-collection-stream"
    }

    fn content_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        let streamable = matches!(result.data, ResultData::Collection(_))
            && ctx.target().is_some_and(|t| t.kind == TargetKind::EntityCollection);
        if streamable && ctx.preference("odata.streaming").is_some() {
            accepts(ctx, APPLICATION_JSON)
        } else {
            0
        }
    }

    fn render_start(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
    ) -> Result<ChunkedActionRenderResult, ODataError> {
        let mut chunk = String::from("{");
        if let Some(fragment) = fragment(result, ctx.target().map(|t| t.kind)) {
            chunk.push_str(&format!(
                "\"@odata.context\":{},",
                Value::String(context_url(ctx, Some(&fragment)))
            ));
        }
        if let Some(count) = result.count() {
            chunk.push_str(&format!("\"@odata.count\":{count},"));
        }
        chunk.push_str("\"value\":[");
        Ok(ChunkedActionRenderResult {
            chunk,
            items_written: 0,
        })
    }

    fn render_body(
        &self,
        _ctx: &RequestContext,
        items: &[Value],
        previous: ChunkedActionRenderResult,
    ) -> Result<ChunkedActionRenderResult, ODataError> {
        let mut chunk = String::new();
        for (i, item) in items.iter().enumerate() {
            if previous.items_written + i > 0 {
                chunk.push(',');
            }
            chunk.push_str(&item.to_string());
        }
        Ok(ChunkedActionRenderResult {
            chunk,
            items_written: previous.items_written + items.len(),
        })
    }

    fn render_end(
        &self,
        _ctx: &RequestContext,
        result: &QueryResult,
        _previous: ChunkedActionRenderResult,
    ) -> Result<String, ODataError> {
        let mut chunk = String::from("]");
        if let Some(link) = result.next_link() {
            chunk.push_str(&format!(",\"@odata.nextLink\":{}", Value::String(link.to_string())));
        }
        chunk.push('}');
        Ok(chunk)
    }
}
