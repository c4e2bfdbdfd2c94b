//! Built-in renderers, unmarshallers and the batch response writer.
//!
//! Registration order of the defaults (ties go to the earlier entry):
//!
//! | # | renderer           | handles                         | media type       |
//! |---|--------------------|---------------------------------|------------------|
//! | 1 | `json-error`       | faults                          | application/json |
//! | 2 | `xml-error`        | faults                          | application/xml  |
//! | 3 | `service-document` | service root                    | application/json |
//! | 4 | `csdl-metadata`    | `$metadata`                     | application/xml  |
//! | 5 | `raw-value`        | `$count`, `$value`              | text/plain       |
//! | 6 | `json`             | entities, collections, values   | application/json |
//!
//! Unmarshallers: `json-reference`, `json-parameters`, `json-entity`.
//! Chunked renderers: `json-collection-stream`.

pub mod batch;
pub mod document;
pub mod error;
pub mod json;
pub mod unmarshal;

use std::sync::Arc;

use crate::negotiation::{
    acceptance, ChunkedRenderer, ContentNegotiator, MediaType, Renderer, RequestContext, Unmarshaller,
};

pub use batch::{write_batch_response, BatchResponsePart};
pub use document::{csdl_xml, MetadataRenderer, ServiceDocumentRenderer};
pub use error::{fallback_error_response, JsonErrorRenderer, XmlErrorRenderer};
pub use json::{JsonCollectionStreamRenderer, JsonRenderer, RawValueRenderer};
pub use unmarshal::{JsonEntityUnmarshaller, JsonParametersUnmarshaller, JsonReferenceUnmarshaller};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_PLAIN: &str = "text/plain";

pub fn default_renderers() -> Vec<Arc<dyn Renderer>> {
    vec![
        Arc::new(JsonErrorRenderer),
        Arc::new(XmlErrorRenderer),
        Arc::new(ServiceDocumentRenderer),
        Arc::new(MetadataRenderer),
        Arc::new(RawValueRenderer),
        Arc::new(JsonRenderer),
    ]
}

pub fn default_unmarshallers() -> Vec<Arc<dyn Unmarshaller>> {
    vec![
        Arc::new(JsonReferenceUnmarshaller),
        Arc::new(JsonParametersUnmarshaller),
        Arc::new(JsonEntityUnmarshaller),
    ]
}

pub fn default_chunked_renderers() -> Vec<Arc<dyn ChunkedRenderer>> {
    vec![Arc::new(JsonCollectionStreamRenderer)]
}

impl ContentNegotiator {
    /// Negotiator over the built-in candidates, in documented order.
    pub fn with_defaults() -> Self {
        Self::new(
            default_renderers(),
            default_unmarshallers(),
            default_chunked_renderers(),
        )
    }
}

/// Acceptance score of `media` for this request.
pub(crate) fn accepts(ctx: &RequestContext, media: &str) -> u32 {
    match media.parse::<MediaType>() {
        Ok(offered) => acceptance(&ctx.accepted(), &offered),
        Err(_) => 0,
    }
}

/// True when the request body is declared as `media` (parameters ignored).
pub(crate) fn body_is(ctx: &RequestContext, media: &str) -> bool {
    ctx.content_type().is_some_and(|ct| ct.essence() == media)
}

/// `<root>/$metadata[#fragment]`
pub(crate) fn context_url(ctx: &RequestContext, fragment: Option<&str>) -> String {
    let root = ctx.service_root.trim_end_matches('/');
    match fragment {
        Some(f) => format!("{root}/$metadata#{f}"),
        None => format!("{root}/$metadata"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_is_stable() {
        let negotiator = ContentNegotiator::with_defaults();
        assert_eq!(
            negotiator.renderer_names(),
            vec!["json-error", "xml-error", "service-document", "csdl-metadata", "raw-value", "json"]
        );
    }
}
