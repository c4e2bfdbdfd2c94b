use std::sync::Arc;

use uuid::Uuid;

use super::media::{format_media_type, parse_accept, MediaRange, MediaType};
use crate::edm::EntityDataModel;
use crate::request::{Headers, Method, ODataRequest};
use crate::uri::ast::{PathTarget, RelativeUri};
use crate::uri::ODataUri;

/// Per-request facts shared by negotiation, unmarshalling and rendering.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub method: Method,
    pub headers: Headers,
    /// Passed through to data sources untouched.
    pub access_token: Option<String>,
    pub service_root: String,
    /// `$format`, overriding `Accept` when present.
    pub format: Option<String>,
    /// Set once the URI has been parsed.
    pub uri: Option<ODataUri>,
    pub model: Arc<EntityDataModel>,
}

impl RequestContext {
    pub fn new(request: &ODataRequest, model: Arc<EntityDataModel>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: request.method,
            headers: request.headers.clone(),
            access_token: request.access_token().map(str::to_string),
            service_root: String::new(),
            format: None,
            uri: None,
            model,
        }
    }

    /// Record the parsed URI; takes the service root and `$format` from it.
    pub fn with_uri(mut self, uri: ODataUri) -> Self {
        self.attach_uri(uri);
        self
    }

    pub fn attach_uri(&mut self, uri: ODataUri) {
        self.service_root = uri.service_root.clone();
        self.format = uri.format().map(str::to_string);
        self.uri = Some(uri);
    }

    pub fn relative(&self) -> Option<&RelativeUri> {
        self.uri.as_ref().map(|u| &u.relative)
    }

    pub fn target(&self) -> Option<&PathTarget> {
        self.uri
            .as_ref()
            .and_then(ODataUri::resource_path)
            .map(|r| &r.target)
    }

    /// Acceptable response media ranges, `$format` first.
    pub fn accepted(&self) -> Vec<MediaRange> {
        if let Some(media) = self.format.as_deref().and_then(format_media_type) {
            return vec![MediaRange {
                media,
                quality: 1.0,
            }];
        }
        parse_accept(self.headers.get("accept").unwrap_or_default())
    }

    /// Declared request body type, if parseable.
    pub fn content_type(&self) -> Option<MediaType> {
        self.headers.get("content-type")?.parse().ok()
    }

    /// `Prefer` header preference, e.g. `odata.maxpagesize`.
    pub fn preference(&self, name: &str) -> Option<&str> {
        self.headers.get("prefer")?.split(',').find_map(|p| {
            let p = p.trim();
            match p.split_once('=') {
                Some((n, v)) if n.trim().eq_ignore_ascii_case(name) => Some(v.trim()),
                None if p.eq_ignore_ascii_case(name) => Some(""),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::build_model;

    fn context(request: ODataRequest) -> RequestContext {
        RequestContext::new(&request, Arc::new(build_model("Container", &[]).unwrap()))
    }

    #[test]
    fn format_overrides_accept() {
        let mut ctx = context(ODataRequest::get("/odata.svc").with_header("Accept", "application/xml"));
        assert_eq!(ctx.accepted()[0].media.essence(), "application/xml");
        ctx.format = Some("json".into());
        let accepted = ctx.accepted();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].media.essence(), "application/json");
    }

    #[test]
    fn token_and_preferences() {
        let ctx = context(
            ODataRequest::get("/odata.svc")
                .with_header("Authorization", "Bearer t0k")
                .with_header("Prefer", "odata.streaming, odata.maxpagesize=2"),
        );
        assert_eq!(ctx.access_token.as_deref(), Some("t0k"));
        assert_eq!(ctx.preference("odata.maxpagesize"), Some("2"));
        assert_eq!(ctx.preference("odata.streaming"), Some(""));
        assert_eq!(ctx.preference("return"), None);
    }
}
