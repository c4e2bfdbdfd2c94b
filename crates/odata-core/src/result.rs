//! Normalised processing results.
//!
//! Data sources answer with a [`ProcessorOutput`]; rendering only ever sees a
//! [`QueryResult`].

use std::collections::BTreeMap;

use serde_json::Value;

use crate::edm::{EntityDataModel, PrimitiveKind};
use crate::error::ErrorPayload;
use crate::processor::{DataSourceError, ProcessorOutput};
use crate::uri::ast::{PathTarget, ResourcePathUri, TargetKind};

/// Metadata key for the total count (`$count=true`).
pub const META_COUNT: &str = "count";
/// Metadata key for the server-driven paging link.
pub const META_NEXT_LINK: &str = "nextLink";

#[derive(Debug, Clone, PartialEq)]
pub enum ResultData {
    Collection(Vec<Value>),
    Entity(Value),
    /// Primitive, complex, or collection-of-those value.
    Value(Value),
    Nothing,
    Fault(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub data: ResultData,
    /// Qualified type of the payload (element type for collections).
    pub type_name: Option<String>,
    pub entity_set: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl QueryResult {
    fn of(data: ResultData) -> Self {
        Self {
            data,
            type_name: None,
            entity_set: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn collection(items: Vec<Value>) -> Self {
        Self::of(ResultData::Collection(items))
    }

    pub fn entity(value: Value) -> Self {
        Self::of(ResultData::Entity(value))
    }

    pub fn value(value: Value) -> Self {
        Self::of(ResultData::Value(value))
    }

    pub fn nothing() -> Self {
        Self::of(ResultData::Nothing)
    }

    pub fn fault(payload: ErrorPayload) -> Self {
        Self::of(ResultData::Fault(payload))
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_entity_set(mut self, entity_set: Option<String>) -> Self {
        self.entity_set = entity_set;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.data, ResultData::Fault(_))
    }

    pub fn count(&self) -> Option<u64> {
        self.metadata.get(META_COUNT).and_then(Value::as_u64)
    }

    pub fn next_link(&self) -> Option<&str> {
        self.metadata.get(META_NEXT_LINK).and_then(Value::as_str)
    }

    /// Normalise a data-source answer for the resource it addressed.
    ///
    /// A missing single entity becomes `NotFound`.
    pub fn from_output(
        output: ProcessorOutput,
        resource: &ResourcePathUri,
    ) -> Result<Self, DataSourceError> {
        let target = &resource.target;
        let result = match output {
            ProcessorOutput::Entities {
                items,
                total,
                next_link,
            } => {
                let mut result = Self::collection(items);
                if let Some(total) = total.filter(|_| resource.count_requested()) {
                    result = result.with_metadata(META_COUNT, Value::from(total));
                }
                if let Some(link) = next_link {
                    result = result.with_metadata(META_NEXT_LINK, Value::String(link));
                }
                result
            }
            ProcessorOutput::Entity(Some(entity)) | ProcessorOutput::Updated(Some(entity)) => {
                Self::entity(entity)
            }
            ProcessorOutput::Created { entity, .. } => Self::entity(entity),
            ProcessorOutput::Entity(None) => {
                return Err(DataSourceError::NotFound(resource.path_string()));
            }
            ProcessorOutput::Property(value) => match target.kind {
                TargetKind::Entity => Self::entity(value),
                TargetKind::EntityCollection => match value {
                    Value::Array(items) => Self::collection(items),
                    other => Self::value(other),
                },
                _ => Self::value(value),
            },
            ProcessorOutput::Count(n) => Self::value(Value::from(n)),
            ProcessorOutput::Updated(None) | ProcessorOutput::Empty => Self::nothing(),
        };
        Ok(result.typed_for(target))
    }

    fn typed_for(mut self, target: &PathTarget) -> Self {
        if let Some(type_name) = &target.type_name {
            self.type_name = Some(type_name.clone());
        }
        self.entity_set = target.entity_set.clone();
        self
    }
}

/// Canonical `Set(key)` path of an entity value, from its key properties.
pub fn entity_path(model: &EntityDataModel, entity_set: &str, entity: &Value) -> Option<String> {
    let set = model.entity_set(entity_set)?;
    let keys = model.key_properties(&set.entity_type);
    if keys.is_empty() {
        return None;
    }
    let mut rendered = Vec::with_capacity(keys.len());
    for key in &keys {
        let value = entity.get(&key.name)?;
        let quoted = matches!(
            model.primitive_kind(&key.type_ref.type_name),
            Some(PrimitiveKind::String)
        );
        let text = match value {
            Value::String(s) if quoted => format!("'{}'", s.replace('\'', "''")),
            Value::String(s) => s.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        rendered.push((key.name.as_str(), text));
    }
    let predicate = if rendered.len() == 1 {
        rendered[0].1.clone()
    } else {
        rendered
            .iter()
            .map(|(name, text)| format!("{name}={text}"))
            .collect::<Vec<_>>()
            .join(",")
    };
    Some(format!("{entity_set}({predicate})"))
}
