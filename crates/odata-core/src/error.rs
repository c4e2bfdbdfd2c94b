//! Error taxonomy for the protocol core.
//!
//! Each stage raises its own typed error; `ODataError` is the envelope the
//! pipeline carries into the `Faulted` state and renders as an
//! [`ErrorPayload`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchError;
use crate::edm::MetadataError;
use crate::negotiation::NegotiationError;
use crate::processor::DataSourceError;
use crate::uri::UriParseError;

pub type Result<T> = std::result::Result<T, ODataError>;

#[derive(Debug, Error)]
pub enum ODataError {
    #[error("parse error: {0}")]
    Parse(#[from] UriParseError),

    #[error("metadata inconsistent: {0}")]
    Metadata(#[from] MetadataError),

    #[error("batch format error: {0}")]
    Batch(#[from] BatchError),

    #[error("{0}")]
    Negotiation(#[from] NegotiationError),

    #[error("invalid request body: {message}")]
    InvalidBody {
        message: String,
        target: Option<String>,
    },

    #[error("method {method} is not allowed on {target}")]
    MethodNotAllowed { method: String, target: String },

    #[error("processing {context} failed: {source}")]
    Processing {
        context: String,
        source: DataSourceError,
    },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ODataError {
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::InvalidBody {
            message: message.into(),
            target: None,
        }
    }

    pub fn invalid_property(property: &str, message: impl Into<String>) -> Self {
        Self::InvalidBody {
            message: message.into(),
            target: Some(property.to_string()),
        }
    }

    /// Wrap a data-source failure with the request it was serving.
    pub fn processing(context: impl Into<String>, source: DataSourceError) -> Self {
        Self::Processing {
            context: context.into(),
            source,
        }
    }

    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(e) if e.is_unsupported() => "NOT_IMPLEMENTED",
            Self::Parse(_) | Self::InvalidBody { .. } => "PARSE_ERROR",
            Self::Metadata(_) => "METADATA_INCONSISTENT",
            Self::Batch(_) => "BATCH_FORMAT",
            Self::Negotiation(NegotiationError::NotAcceptable { .. }) => "NOT_ACCEPTABLE",
            Self::Negotiation(NegotiationError::UnsupportedMediaType { .. }) => {
                "UNSUPPORTED_MEDIA_TYPE"
            }
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::Processing { source, .. } => match source {
                DataSourceError::NotFound(_) => "NOT_FOUND",
                DataSourceError::Conflict(_) => "CONFLICT",
                DataSourceError::Unsupported(_) => "NOT_IMPLEMENTED",
                DataSourceError::Rejected(_) | DataSourceError::Storage(_) => "PROCESSING_ERROR",
            },
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(e) if e.is_unsupported() => 501,
            Self::Parse(_) | Self::InvalidBody { .. } | Self::Batch(_) => 400,
            Self::Metadata(_) | Self::Internal(_) => 500,
            Self::Negotiation(NegotiationError::NotAcceptable { .. }) => 406,
            Self::Negotiation(NegotiationError::UnsupportedMediaType { .. }) => 415,
            Self::MethodNotAllowed { .. } => 405,
            Self::Processing { source, .. } => match source {
                DataSourceError::NotFound(_) => 404,
                DataSourceError::Conflict(_) => 409,
                DataSourceError::Rejected(_) => 400,
                DataSourceError::Unsupported(_) => 501,
                DataSourceError::Storage(_) => 500,
            },
            Self::NotImplemented(_) => 501,
        }
    }

    /// The property or segment the error points at, when known.
    pub fn target(&self) -> Option<String> {
        match self {
            Self::Parse(e) => e.target(),
            Self::InvalidBody { target, .. } => target.clone(),
            Self::Batch(e) => e.part_index().map(|part| format!("part {part}")),
            Self::Processing { context, .. } => Some(context.clone()),
            Self::MethodNotAllowed { target, .. } => Some(target.clone()),
            _ => None,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            target: self.target(),
            status: self.http_status(),
        }
    }
}

/// Structured error object rendered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip)]
    pub status: u16,
}

impl ErrorPayload {
    /// Fixed minimal JSON rendering, used when negotiation for the error
    /// representation itself cannot proceed.
    pub fn to_minimal_json(&self) -> String {
        serde_json::json!({ "error": self }).to_string()
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{}] {} (target: {})", self.code, self.message, target),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}
