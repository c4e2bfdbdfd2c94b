//! Content negotiation
//!
//! Every candidate scores the request; 0 means "cannot handle". The
//! strictly highest positive score wins and equal top scores go to the
//! candidate registered first, so registration order is part of the
//! contract. Renderers, unmarshallers and chunked renderers each have their
//! own candidate list.

pub mod context;
pub mod media;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::ODataError;
use crate::processor::RequestBody;
use crate::request::{ODataResponse, ResponseBody};
use crate::result::QueryResult;

pub use context::RequestContext;
pub use media::{acceptance, format_media_type, parse_accept, MediaRange, MediaType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no acceptable representation for {what}")]
    NotAcceptable { what: String },

    #[error("unsupported media type '{content_type}'")]
    UnsupportedMediaType { content_type: String },
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32;

    fn render(&self, ctx: &RequestContext, result: &QueryResult) -> Result<ODataResponse, ODataError>;
}

pub trait Unmarshaller: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, ctx: &RequestContext, body: &str) -> u32;

    fn unmarshal(&self, ctx: &RequestContext, body: &str) -> Result<RequestBody, ODataError>;
}

/// State threaded from one chunked render call into the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedActionRenderResult {
    /// Text produced by the call that returned this value.
    pub chunk: String,
    pub items_written: usize,
}

/// Streams one response as `render_start`, any number of `render_body`
/// calls, then `render_end`. [`render_chunked`] keeps that order.
pub trait ChunkedRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn content_type(&self) -> &'static str;

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32;

    fn render_start(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
    ) -> Result<ChunkedActionRenderResult, ODataError>;

    fn render_body(
        &self,
        ctx: &RequestContext,
        items: &[Value],
        previous: ChunkedActionRenderResult,
    ) -> Result<ChunkedActionRenderResult, ODataError>;

    fn render_end(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
        previous: ChunkedActionRenderResult,
    ) -> Result<String, ODataError>;
}

/// Index of the first candidate with the strictly highest positive score.
pub fn select_best<T: ?Sized>(
    candidates: &[Arc<T>],
    mut score: impl FnMut(&T) -> u32,
) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let s = score(candidate.as_ref());
        if s > 0 && best.is_none_or(|(_, top)| s > top) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

/// Registered candidates, in registration order.
#[derive(Clone, Default)]
pub struct ContentNegotiator {
    renderers: Vec<Arc<dyn Renderer>>,
    unmarshallers: Vec<Arc<dyn Unmarshaller>>,
    chunked: Vec<Arc<dyn ChunkedRenderer>>,
}

impl ContentNegotiator {
    pub fn new(
        renderers: Vec<Arc<dyn Renderer>>,
        unmarshallers: Vec<Arc<dyn Unmarshaller>>,
        chunked: Vec<Arc<dyn ChunkedRenderer>>,
    ) -> Self {
        Self {
            renderers,
            unmarshallers,
            chunked,
        }
    }

    pub fn renderer_names(&self) -> Vec<&'static str> {
        self.renderers.iter().map(|r| r.name()).collect()
    }

    pub fn select_renderer(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
    ) -> Result<&dyn Renderer, NegotiationError> {
        let index = select_best(&self.renderers, |r| r.score(ctx, result)).ok_or_else(|| {
            NegotiationError::NotAcceptable {
                what: describe(ctx),
            }
        })?;
        let renderer = self.renderers[index].as_ref();
        debug!(request_id = %ctx.request_id, renderer = renderer.name(), "renderer selected");
        Ok(renderer)
    }

    pub fn select_unmarshaller(
        &self,
        ctx: &RequestContext,
        body: &str,
    ) -> Result<&dyn Unmarshaller, NegotiationError> {
        let index = select_best(&self.unmarshallers, |u| u.score(ctx, body)).ok_or_else(|| {
            NegotiationError::UnsupportedMediaType {
                content_type: ctx
                    .headers
                    .get("content-type")
                    .unwrap_or("(none)")
                    .to_string(),
            }
        })?;
        let unmarshaller = self.unmarshallers[index].as_ref();
        debug!(request_id = %ctx.request_id, unmarshaller = unmarshaller.name(), "unmarshaller selected");
        Ok(unmarshaller)
    }

    /// A chunked renderer willing to stream `result`, if any.
    pub fn select_chunked(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
    ) -> Option<&dyn ChunkedRenderer> {
        let index = select_best(&self.chunked, |r| r.score(ctx, result))?;
        let renderer = self.chunked[index].as_ref();
        debug!(request_id = %ctx.request_id, renderer = renderer.name(), "chunked renderer selected");
        Some(renderer)
    }
}

fn describe(ctx: &RequestContext) -> String {
    ctx.relative()
        .map(|r| r.describe())
        .unwrap_or_else(|| "error response".to_string())
}

/// Drive `renderer` over `items` in chunks of `chunk_size`.
pub fn render_chunked(
    renderer: &dyn ChunkedRenderer,
    ctx: &RequestContext,
    result: &QueryResult,
    items: &[Value],
    chunk_size: usize,
) -> Result<ODataResponse, ODataError> {
    let mut chunks = Vec::new();
    let mut state = renderer.render_start(ctx, result)?;
    chunks.push(std::mem::take(&mut state.chunk));
    for slice in items.chunks(chunk_size.max(1)) {
        state = renderer.render_body(ctx, slice, state)?;
        chunks.push(std::mem::take(&mut state.chunk));
    }
    chunks.push(renderer.render_end(ctx, result, state)?);
    let mut response = ODataResponse::new(200, renderer.content_type(), "");
    response.body = ResponseBody::Chunked(chunks);
    Ok(response)
}
