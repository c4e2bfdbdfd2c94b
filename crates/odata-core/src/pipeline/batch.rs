//! `$batch` processing.
//!
//! Components fan out to their own tasks and fan back in, in request order.
//! A changeset runs its members one after another inside a single
//! [`ChangesetTransaction`](crate::processor::ChangesetTransaction): the
//! first failure rolls everything back and the whole changeset is reported
//! as that one error.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, error};
use uuid::Uuid;

use super::{Backend, Pipeline, PipelineState};
use crate::batch::{boundary_from_content_type, parse_batch, BatchRequest, RequestComponent};
use crate::error::ODataError;
use crate::negotiation::RequestContext;
use crate::render::{fallback_error_response, write_batch_response, BatchResponsePart};
use crate::request::{ODataRequest, ODataResponse};

/// Per-component outcomes of one batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOperationResult {
    pub parts: Vec<BatchResponsePart>,
}

impl BatchOperationResult {
    pub fn to_response(&self) -> Result<ODataResponse, ODataError> {
        let boundary = format!("batchresponse_{}", Uuid::new_v4());
        let body = write_batch_response(&boundary, &self.parts).map_err(|e| ODataError::Internal(e.into()))?;
        Ok(ODataResponse::new(
            200,
            &format!("multipart/mixed; boundary={boundary}"),
            body,
        ))
    }
}

/// Rewrite a leading `$<content-id>` to the path of the entity that request created.
fn substitute_content_id(member: &BatchRequest, created: &HashMap<String, String>) -> BatchRequest {
    let mut member = member.clone();
    if let Some(reference) = member.content_id_reference().map(str::to_string) {
        if let Some(path) = created.get(&reference) {
            let rest = &member.url[reference.len() + 1..];
            member.url = format!("{path}{rest}");
        }
    }
    member
}

fn standalone(member: &BatchRequest, service_root: &str, authorization: Option<&str>) -> ODataRequest {
    let mut request = member.to_request(service_root);
    if let Some(auth) = authorization {
        if !request.headers.contains("authorization") {
            request.headers.insert("Authorization", auth);
        }
    }
    request
}

impl Pipeline {
    pub(crate) async fn batch(
        &self,
        ctx: &RequestContext,
        request: &ODataRequest,
    ) -> Result<ODataResponse, ODataError> {
        let boundary = boundary_from_content_type(request.headers.get("content-type").unwrap_or_default())?;
        let content = parse_batch(
            request.body.as_deref().unwrap_or_default(),
            &boundary,
            self.config().max_batch_parts,
        )?;
        debug!(
            request_id = %ctx.request_id,
            components = content.len(),
            requests = content.request_count(),
            "batch fan-out"
        );

        let authorization = ctx.headers.get("authorization").map(str::to_string);
        let handles: Vec<_> = content
            .components
            .into_iter()
            .map(|component| {
                let pipeline = self.clone();
                let root = ctx.service_root.clone();
                let authorization = authorization.clone();
                tokio::spawn(async move { pipeline.component(component, root, authorization).await })
            })
            .collect();

        let mut result = BatchOperationResult::default();
        for joined in join_all(handles).await {
            let part = joined.unwrap_or_else(|e| {
                let err = ODataError::Internal(anyhow::anyhow!("batch component task failed: {e}"));
                BatchResponsePart::Response {
                    response: fallback_error_response(&err.payload()),
                    content_id: None,
                }
            });
            result.parts.push(part);
        }
        debug!(request_id = %ctx.request_id, parts = result.parts.len(), "batch fan-in");
        result.to_response()
    }

    async fn component(
        self,
        component: RequestComponent,
        service_root: String,
        authorization: Option<String>,
    ) -> BatchResponsePart {
        match component {
            RequestComponent::Request(member) => {
                let request = standalone(&member, &service_root, authorization.as_deref());
                let run = self.run_boxed(request).await;
                BatchResponsePart::Response {
                    response: run.response,
                    content_id: member.content_id,
                }
            }
            RequestComponent::Changeset { requests, .. } => {
                match self
                    .changeset(&requests, &service_root, authorization.as_deref())
                    .await
                {
                    Ok(responses) => BatchResponsePart::Changeset {
                        boundary: format!("changesetresponse_{}", Uuid::new_v4()),
                        responses,
                    },
                    Err(response) => BatchResponsePart::Response {
                        response,
                        content_id: None,
                    },
                }
            }
        }
    }

    /// Apply all members or none. `Err` carries the rendered failure.
    async fn changeset(
        &self,
        requests: &[BatchRequest],
        service_root: &str,
        authorization: Option<&str>,
    ) -> Result<Vec<(ODataResponse, Option<String>)>, ODataResponse> {
        let fail = |err: ODataError| fallback_error_response(&err.payload());
        let model = self
            .registry()
            .entity_data_model()
            .map_err(|e| fail(e.into()))?;
        let mut tx = self
            .inner
            .source
            .begin_changeset()
            .await
            .map_err(|e| fail(ODataError::processing("changeset", e)))?;

        let mut created: HashMap<String, String> = HashMap::new();
        let mut responses = Vec::with_capacity(requests.len());
        for member in requests {
            let member = substitute_content_id(member, &created);
            let request = standalone(&member, service_root, authorization);
            let mut ctx = RequestContext::new(&request, Arc::clone(&model));
            let mut states = vec![PipelineState::Received];
            let outcome = self
                .advance_boxed(&mut ctx, &request, &mut states, &mut Backend::Changeset(&mut tx))
                .await;
            match outcome {
                Ok((response, path)) => {
                    if let (Some(id), Some(path)) = (&member.content_id, path) {
                        created.insert(id.clone(), path);
                    }
                    responses.push((response, member.content_id.clone()));
                }
                Err(err) => {
                    let response = self.render_error(&ctx, &err);
                    if let Err(e) = tx.rollback().await {
                        error!(request_id = %ctx.request_id, "changeset rollback failed: {e}");
                    }
                    debug!(request_id = %ctx.request_id, "changeset rolled back");
                    return Err(response);
                }
            }
        }
        tx.commit()
            .await
            .map_err(|e| fail(ODataError::processing("changeset commit", e)))?;
        Ok(responses)
    }

    fn advance_boxed<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a ODataRequest,
        states: &'a mut Vec<PipelineState>,
        backend: &'a mut Backend<'_>,
    ) -> BoxFuture<'a, Result<(ODataResponse, Option<String>), ODataError>> {
        Box::pin(self.advance(ctx, request, states, backend))
    }
}
