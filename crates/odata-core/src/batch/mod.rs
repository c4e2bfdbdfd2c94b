//! `$batch` framing
//!
//! The decomposer only frames: it splits a `multipart/mixed` body into
//! ordered requests and changesets without resolving any URI. Each request
//! re-enters the pipeline at the Parse stage later.

pub mod parser;

use serde::Serialize;
use thiserror::Error;

use crate::request::{Headers, Method, ODataRequest};

pub use parser::{boundary_from_content_type, parse_batch};

/// One HTTP request embedded in a batch part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    pub method: Method,
    /// URL exactly as written: absolute, root-relative, or relative to the
    /// service root, possibly starting with a `$<content-id>` reference.
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub content_id: Option<String>,
}

impl BatchRequest {
    /// The `$<id>` this request's URL starts with, if any.
    pub fn content_id_reference(&self) -> Option<&str> {
        let rest = self.url.strip_prefix('$')?;
        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        let id = &rest[..end];
        if id.is_empty() || id.chars().any(|c| !(c.is_alphanumeric() || c == '-' || c == '_')) {
            return None;
        }
        // Reserved resource names are not references.
        if matches!(id, "metadata" | "batch" | "entity" | "all" | "crossjoin" | "count" | "value" | "ref") {
            return None;
        }
        Some(id)
    }

    /// Standalone request against `service_root`.
    pub fn to_request(&self, service_root: &str) -> ODataRequest {
        let uri = if self.url.contains("://") || self.url.starts_with('/') {
            self.url.clone()
        } else {
            format!("{}/{}", service_root.trim_end_matches('/'), self.url)
        };
        ODataRequest {
            method: self.method,
            uri,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestComponent {
    Request(BatchRequest),
    /// Write requests applied all-or-nothing.
    Changeset {
        boundary: String,
        requests: Vec<BatchRequest>,
    },
}

impl RequestComponent {
    pub fn request_count(&self) -> usize {
        match self {
            RequestComponent::Request(_) => 1,
            RequestComponent::Changeset { requests, .. } => requests.len(),
        }
    }
}

/// A decomposed batch body, components in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRequestContent {
    pub components: Vec<RequestComponent>,
}

impl BatchRequestContent {
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Total number of requests, counting changeset members.
    pub fn request_count(&self) -> usize {
        self.components.iter().map(RequestComponent::request_count).sum()
    }
}

/// Batch framing failure. `part` is the zero-based index of the top-level
/// part at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("missing or invalid multipart boundary: {0}")]
    MissingBoundary(String),

    #[error("part {part}: {reason}")]
    Malformed { part: usize, reason: String },

    #[error("part {part}: content type '{content_type}' is neither application/http nor multipart/mixed")]
    NotHttp { part: usize, content_type: String },

    #[error("part {part}: reference ${reference} does not resolve to an earlier request of the same changeset")]
    UnresolvedContentId { part: usize, reference: String },

    #[error("batch holds more than {limit} requests")]
    TooManyRequests { limit: usize },
}

impl BatchError {
    pub fn malformed(part: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            part,
            reason: reason.into(),
        }
    }

    pub fn part_index(&self) -> Option<usize> {
        match self {
            Self::Malformed { part, .. }
            | Self::NotHttp { part, .. }
            | Self::UnresolvedContentId { part, .. } => Some(*part),
            Self::MissingBoundary(_) | Self::TooManyRequests { .. } => None,
        }
    }
}
