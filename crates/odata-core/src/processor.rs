//! Data-source port.
//!
//! The pipeline never touches storage directly. Reads and writes go through
//! [`DataSource`]; changeset members go through one [`ChangesetTransaction`]
//! which the pipeline commits or rolls back as a unit.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::uri::ast::ResourcePathUri;

/// Storage failure, propagated unchanged in kind.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unsupported by data source: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Decoded request payload handed to the data source.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    None,
    /// Entity properties, already checked against the target type.
    Entity(Map<String, Value>),
    /// `@odata.id` of the entity a `$ref` write points at.
    Reference(String),
    /// Action parameters.
    Parameters(Map<String, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    /// PUT replaces, PATCH merges.
    Update { replace: bool },
    Delete,
    InvokeAction,
    AddReference,
    RemoveReference,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Update { replace: true } => "replace",
            WriteKind::Update { replace: false } => "merge",
            WriteKind::Delete => "delete",
            WriteKind::InvokeAction => "invoke",
            WriteKind::AddReference => "add-ref",
            WriteKind::RemoveReference => "remove-ref",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub request_id: Uuid,
    pub resource: ResourcePathUri,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub request_id: Uuid,
    pub kind: WriteKind,
    pub resource: ResourcePathUri,
    pub body: RequestBody,
    pub access_token: Option<String>,
}

/// Raw processor output, normalised into a `QueryResult` before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOutput {
    Entities {
        items: Vec<Value>,
        /// Total matching entities ignoring `$top`/`$skip`, when asked for.
        total: Option<u64>,
        next_link: Option<String>,
    },
    /// `None` when the addressed entity does not exist.
    Entity(Option<Value>),
    Property(Value),
    Count(u64),
    /// Entity created by a write; `path` is its canonical relative path.
    Created { entity: Value, path: String },
    /// Entity after an update, if the source returns it.
    Updated(Option<Value>),
    Empty,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn read(&self, request: &ReadRequest) -> Result<ProcessorOutput, DataSourceError>;

    async fn write(&self, request: &WriteRequest) -> Result<ProcessorOutput, DataSourceError>;

    /// Open an all-or-nothing unit for one changeset.
    async fn begin_changeset(&self) -> Result<Box<dyn ChangesetTransaction>, DataSourceError>;
}

#[async_trait]
pub trait ChangesetTransaction: Send {
    async fn write(&mut self, request: &WriteRequest) -> Result<ProcessorOutput, DataSourceError>;

    async fn commit(self: Box<Self>) -> Result<(), DataSourceError>;

    async fn rollback(self: Box<Self>) -> Result<(), DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_transparent() {
        let err = DataSourceError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn write_kind_labels() {
        assert_eq!(WriteKind::Update { replace: true }.as_str(), "replace");
        assert_eq!(WriteKind::Update { replace: false }.as_str(), "merge");
        assert_eq!(WriteKind::AddReference.as_str(), "add-ref");
    }
}
