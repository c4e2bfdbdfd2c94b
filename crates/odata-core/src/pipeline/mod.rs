//! Staged request pipeline
//!
//! ```text
//! Received → Parsed → [Unmarshalled] → Processed → Rendered
//!     └──────────┴───────────┴──────────────┴──→ Faulted → Rendered
//! ```
//!
//! Reads skip `Unmarshalled`; batches go `Parsed → Processed` and re-run
//! every decomposed request through the whole pipeline. Each top-level
//! request ends in exactly one rendered response, success or error.

pub mod batch;
pub mod router;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{ServiceConfig, ServiceRoot};
use crate::edm::{EdmRegistry, EntityDataModel};
use crate::error::ODataError;
use crate::negotiation::{render_chunked, ContentNegotiator, RequestContext};
use crate::processor::{
    ChangesetTransaction, DataSource, DataSourceError, ProcessorOutput, ReadRequest, RequestBody,
    WriteKind, WriteRequest,
};
use crate::render::fallback_error_response;
use crate::request::{ODataRequest, ODataResponse};
use crate::result::{QueryResult, ResultData};
use crate::uri::ast::{RelativeUri, ResourcePathUri, TargetKind};
use crate::uri::{UriParseError, UriParser};

pub use router::Route;

/// Items per `render_body` call when streaming without `odata.maxpagesize`.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Parsed,
    Unmarshalled,
    Processed,
    Rendered,
    Faulted,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub request_id: Uuid,
    pub response: ODataResponse,
    /// States visited, in order; always ends with `Rendered`.
    pub states: Vec<PipelineState>,
}

impl PipelineRun {
    pub fn faulted(&self) -> bool {
        self.states.contains(&PipelineState::Faulted)
    }
}

/// What the Process stage hands to Render.
pub(crate) enum Processed {
    Result {
        result: QueryResult,
        status: u16,
        /// Canonical relative path of an entity the request created.
        created: Option<String>,
    },
    /// Already rendered (batch responses).
    Response(ODataResponse),
}

impl Processed {
    fn ok(result: QueryResult) -> Self {
        Processed::Result {
            result,
            status: 200,
            created: None,
        }
    }
}

/// Where writes go: straight to the data source, or into an open changeset.
pub(crate) enum Backend<'a> {
    Direct,
    Changeset(&'a mut Box<dyn ChangesetTransaction>),
}

struct Inner {
    registry: Arc<EdmRegistry>,
    root: ServiceRoot,
    config: ServiceConfig,
    negotiator: ContentNegotiator,
    source: Arc<dyn DataSource>,
}

/// The request pipeline. Cheap to clone; clones share registrations.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<EdmRegistry>,
        config: ServiceConfig,
        negotiator: ContentNegotiator,
        source: Arc<dyn DataSource>,
    ) -> Result<Self, regex::Error> {
        let root = config.service_root()?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                root,
                config,
                negotiator,
                source,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<EdmRegistry> {
        &self.inner.registry
    }

    /// Run one request to a rendered response.
    pub async fn run(&self, request: ODataRequest) -> PipelineRun {
        let mut states = vec![PipelineState::Received];
        let model = match self.inner.registry.entity_data_model() {
            Ok(model) => model,
            Err(err) => {
                let err = ODataError::from(err);
                error!("request rejected, model unavailable: {err}");
                states.push(PipelineState::Faulted);
                states.push(PipelineState::Rendered);
                return PipelineRun {
                    request_id: Uuid::new_v4(),
                    response: fallback_error_response(&err.payload()),
                    states,
                };
            }
        };

        let mut ctx = RequestContext::new(&request, model);
        debug!(request_id = %ctx.request_id, method = %request.method, uri = %request.uri, "request received");
        let response = match self
            .advance(&mut ctx, &request, &mut states, &mut Backend::Direct)
            .await
        {
            Ok((response, _)) => response,
            Err(err) => {
                states.push(PipelineState::Faulted);
                self.render_error(&ctx, &err)
            }
        };
        states.push(PipelineState::Rendered);
        debug!(request_id = %ctx.request_id, status = response.status, "request rendered");
        PipelineRun {
            request_id: ctx.request_id,
            response,
            states,
        }
    }

    /// `run` behind a boxed future, for re-entry from batch tasks.
    pub(crate) fn run_boxed(&self, request: ODataRequest) -> BoxFuture<'static, PipelineRun> {
        let pipeline = self.clone();
        async move { pipeline.run(request).await }.boxed()
    }

    fn enter(&self, ctx: &RequestContext, states: &mut Vec<PipelineState>, state: PipelineState) {
        debug!(request_id = %ctx.request_id, ?state, "stage complete");
        states.push(state);
    }

    fn parser<'m>(&'m self, model: &'m EntityDataModel) -> UriParser<'m> {
        UriParser::new(model, &self.inner.root).with_max_expand_depth(self.inner.config.max_expand_depth)
    }

    /// Parse → (Unmarshal) → Process → Render. Returns the response and the
    /// path of any entity created.
    pub(crate) async fn advance(
        &self,
        ctx: &mut RequestContext,
        request: &ODataRequest,
        states: &mut Vec<PipelineState>,
        backend: &mut Backend<'_>,
    ) -> Result<(ODataResponse, Option<String>), ODataError> {
        // Parse
        let model = Arc::clone(&ctx.model);
        let uri = self.parser(&model).parse(&request.uri)?;
        let route = router::route(request.method, &uri.relative);
        ctx.attach_uri(uri);
        self.enter(ctx, states, PipelineState::Parsed);
        let route = route?;
        debug!(request_id = %ctx.request_id, route = route.label(), "request routed");

        // Unmarshal, Process
        let processed = match route {
            Route::Document => Processed::ok(QueryResult::nothing()),
            Route::Read(resource) => self.read(ctx, resource).await?,
            Route::ReadEntityId { id } => {
                let resource = self.resolve_entity_id(ctx, &id)?;
                self.read(ctx, resource).await?
            }
            Route::Write { kind, resource } => {
                let body = self.unmarshal(ctx, kind, request.body.as_deref())?;
                self.enter(ctx, states, PipelineState::Unmarshalled);
                self.write(ctx, kind, resource, body, backend).await?
            }
            Route::Batch => Processed::Response(self.batch(ctx, request).await?),
        };
        self.enter(ctx, states, PipelineState::Processed);

        // Render
        match processed {
            Processed::Response(response) => Ok((response, None)),
            Processed::Result {
                result,
                status,
                created,
            } => {
                let response = self.render(ctx, &result, status, created.as_deref())?;
                Ok((response, created))
            }
        }
    }

    fn resolve_entity_id(&self, ctx: &RequestContext, id: &str) -> Result<ResourcePathUri, ODataError> {
        let model = Arc::clone(&ctx.model);
        let parser = self.parser(&model);
        let relative = match self.inner.root.split(id) {
            Some(_) => parser.parse(id)?.relative,
            None => parser.parse_relative(id)?,
        };
        let options = ctx
            .relative()
            .map(|r| r.query_options().to_vec())
            .unwrap_or_default();
        match relative {
            RelativeUri::ResourcePath(mut resource) if resource.target.kind == TargetKind::Entity => {
                resource.query_options = options;
                Ok(resource)
            }
            _ => Err(UriParseError::InvalidQueryOption {
                option: "$id".to_string(),
                value: id.to_string(),
                reason: "does not identify a single entity".to_string(),
            }
            .into()),
        }
    }

    fn unmarshal(
        &self,
        ctx: &RequestContext,
        kind: WriteKind,
        body: Option<&str>,
    ) -> Result<RequestBody, ODataError> {
        let body = body.unwrap_or_default();
        let needs_body = !matches!(kind, WriteKind::Delete | WriteKind::RemoveReference);
        if !needs_body {
            return Ok(RequestBody::None);
        }
        let unmarshaller = self.inner.negotiator.select_unmarshaller(ctx, body)?;
        unmarshaller.unmarshal(ctx, body)
    }

    async fn read(&self, ctx: &RequestContext, resource: ResourcePathUri) -> Result<Processed, ODataError> {
        let request = ReadRequest {
            request_id: ctx.request_id,
            resource,
            access_token: ctx.access_token.clone(),
        };
        let context = request.resource.path_string();
        let output = self
            .inner
            .source
            .read(&request)
            .await
            .map_err(|e| ODataError::processing(&context, e))?;
        let result = QueryResult::from_output(output, &request.resource)
            .map_err(|e| ODataError::processing(&context, e))?;
        Ok(Processed::ok(result))
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        kind: WriteKind,
        resource: ResourcePathUri,
        body: RequestBody,
        backend: &mut Backend<'_>,
    ) -> Result<Processed, ODataError> {
        let request = WriteRequest {
            request_id: ctx.request_id,
            kind,
            resource,
            body,
            access_token: ctx.access_token.clone(),
        };
        let context = request.resource.path_string();
        debug!(request_id = %ctx.request_id, kind = kind.as_str(), target = %context, "dispatching write");
        let output = match backend {
            Backend::Direct => self.inner.source.write(&request).await,
            Backend::Changeset(tx) => tx.write(&request).await,
        }
        .map_err(|e| ODataError::processing(&context, e))?;

        let created = match &output {
            ProcessorOutput::Created { path, .. } => Some(path.clone()),
            _ => None,
        };
        let result = QueryResult::from_output(output, &request.resource)
            .map_err(|e: DataSourceError| ODataError::processing(&context, e))?;
        let status = if created.is_some() { 201 } else { 200 };
        Ok(Processed::Result {
            result,
            status,
            created,
        })
    }

    fn render(
        &self,
        ctx: &RequestContext,
        result: &QueryResult,
        status: u16,
        created: Option<&str>,
    ) -> Result<ODataResponse, ODataError> {
        let is_document = matches!(
            ctx.relative(),
            Some(RelativeUri::ServiceDocument { .. } | RelativeUri::Metadata { .. })
        );
        if result.data == ResultData::Nothing && !is_document {
            return Ok(ODataResponse::no_content());
        }

        let negotiator = &self.inner.negotiator;
        let mut response = match (&result.data, negotiator.select_chunked(ctx, result)) {
            (ResultData::Collection(items), Some(chunked)) => {
                let chunk_size = ctx
                    .preference("odata.maxpagesize")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CHUNK_SIZE);
                render_chunked(chunked, ctx, result, items, chunk_size)?
            }
            _ => negotiator.select_renderer(ctx, result)?.render(ctx, result)?,
        };
        if response.status == 200 {
            response.status = status;
        }
        if let Some(path) = created {
            let root = ctx.service_root.trim_end_matches('/');
            response.headers.insert("Location", format!("{root}/{path}"));
        }
        Ok(response)
    }

    /// Render `err` in a negotiated error format, or the minimal JSON
    /// fallback when no error renderer is acceptable.
    pub(crate) fn render_error(&self, ctx: &RequestContext, err: &ODataError) -> ODataResponse {
        let payload = err.payload();
        if payload.status >= 500 {
            error!(request_id = %ctx.request_id, code = %payload.code, "request faulted: {err}");
        } else {
            warn!(request_id = %ctx.request_id, code = %payload.code, "request faulted: {err}");
        }
        let result = QueryResult::fault(payload.clone());
        match self.inner.negotiator.select_renderer(ctx, &result) {
            Ok(renderer) => renderer
                .render(ctx, &result)
                .unwrap_or_else(|_| fallback_error_response(&payload)),
            Err(_) => fallback_error_response(&payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faulted_is_derived_from_states() {
        let run = PipelineRun {
            request_id: Uuid::nil(),
            response: ODataResponse::no_content(),
            states: vec![PipelineState::Received, PipelineState::Faulted, PipelineState::Rendered],
        };
        assert!(run.faulted());
    }
}
