use std::fmt::Write;

use super::document::xml_escape;
use super::{accepts, APPLICATION_JSON, APPLICATION_XML};
use crate::error::{ErrorPayload, ODataError};
use crate::negotiation::{Renderer, RequestContext};
use crate::request::ODataResponse;
use crate::result::{QueryResult, ResultData};

fn fault(result: &QueryResult) -> Option<&ErrorPayload> {
    match &result.data {
        ResultData::Fault(payload) => Some(payload),
        _ => None,
    }
}

/// `{"error": {"code": ..., "message": ..., "target": ...}}`
pub struct JsonErrorRenderer;

impl Renderer for JsonErrorRenderer {
    fn name(&self) -> &'static str {
        "json-error"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        match fault(result) {
            Some(_) => accepts(ctx, APPLICATION_JSON),
            None => 0,
        }
    }

    fn render(&self, _ctx: &RequestContext, result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let payload = fault(result)
            .ok_or_else(|| ODataError::Internal(anyhow::anyhow!("json-error asked to render a non-fault")))?;
        Ok(fallback_error_response(payload))
    }
}

pub struct XmlErrorRenderer;

impl Renderer for XmlErrorRenderer {
    fn name(&self) -> &'static str {
        "xml-error"
    }

    fn score(&self, ctx: &RequestContext, result: &QueryResult) -> u32 {
        match fault(result) {
            Some(_) => accepts(ctx, APPLICATION_XML),
            None => 0,
        }
    }

    fn render(&self, _ctx: &RequestContext, result: &QueryResult) -> Result<ODataResponse, ODataError> {
        let payload = fault(result)
            .ok_or_else(|| ODataError::Internal(anyhow::anyhow!("xml-error asked to render a non-fault")))?;
        let xml = error_xml(payload).map_err(|e| ODataError::Internal(e.into()))?;
        Ok(ODataResponse::new(payload.status, APPLICATION_XML, xml))
    }
}

fn error_xml(payload: &ErrorPayload) -> Result<String, std::fmt::Error> {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(r#"<error xmlns="http://docs.oasis-open.org/odata/ns/metadata">"#);
    write!(xml, "<code>{}</code>", xml_escape(&payload.code))?;
    write!(xml, "<message>{}</message>", xml_escape(&payload.message))?;
    if let Some(target) = &payload.target {
        write!(xml, "<target>{}</target>", xml_escape(target))?;
    }
    xml.push_str("</error>");
    Ok(xml)
}

/// Minimal JSON error response, used when no error renderer is acceptable.
pub fn fallback_error_response(payload: &ErrorPayload) -> ODataResponse {
    ODataResponse::new(payload.status, APPLICATION_JSON, payload.to_minimal_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::build_model;
    use crate::request::ODataRequest;
    use std::sync::Arc;

    fn ctx(accept: &str) -> RequestContext {
        RequestContext::new(
            &ODataRequest::get("/odata.svc").with_header("Accept", accept),
            Arc::new(build_model("Container", &[]).unwrap()),
        )
    }

    fn not_found() -> QueryResult {
        QueryResult::fault(ErrorPayload {
            code: "NOT_FOUND".into(),
            message: "no <such> entity".into(),
            target: Some("Customers('X')".into()),
            status: 404,
        })
    }

    #[test]
    fn json_error_body() {
        let response = JsonErrorRenderer.render(&ctx("*/*"), &not_found()).unwrap();
        assert_eq!(response.status, 404);
        let json = response.json().unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["target"], "Customers('X')");
    }

    #[test]
    fn xml_error_is_escaped() {
        let response = XmlErrorRenderer.render(&ctx("application/xml"), &not_found()).unwrap();
        assert_eq!(response.content_type(), Some("application/xml"));
        assert!(response.text().contains("<message>no &lt;such&gt; entity</message>"));
    }

    #[test]
    fn xml_error_target_is_optional() {
        let xml = error_xml(&ErrorPayload {
            code: "PARSE_ERROR".into(),
            message: "bad".into(),
            target: None,
            status: 400,
        })
        .unwrap();
        assert!(xml.ends_with("<code>PARSE_ERROR</code><message>bad</message></error>"));

        let with_target = XmlErrorRenderer.render(&ctx("application/xml"), &not_found()).unwrap();
        assert!(with_target.text().contains("<target>Customers('X')</target>"));
    }

    #[test]
    fn error_renderers_ignore_non_faults() {
        assert_eq!(JsonErrorRenderer.score(&ctx("*/*"), &QueryResult::nothing()), 0);
        assert!(XmlErrorRenderer.score(&ctx("application/xml"), &not_found()) > 0);
        assert_eq!(XmlErrorRenderer.score(&ctx("application/json"), &not_found()), 0);
    }
}
