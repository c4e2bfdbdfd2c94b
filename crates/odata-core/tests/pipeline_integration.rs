//! End-to-end pipeline runs against the in-memory data source.

mod common;

use common::{harness, url, ROOT};
use odata_core::request::{Method, ODataRequest, ResponseBody};
use odata_core::PipelineState::{Faulted, Parsed, Processed, Received, Rendered, Unmarshalled};
use pretty_assertions::assert_eq;
use serde_json::json;

fn post(relative: &str, body: &str) -> ODataRequest {
    ODataRequest::new(Method::Post, url(relative))
        .with_header("Content-Type", "application/json")
        .with_body(body)
}

#[tokio::test]
async fn reads_a_collection_with_context_and_count() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("Customers?$count=true&$top=2"))).await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.states, vec![Received, Parsed, Processed, Rendered]);
    let body = run.response.json().unwrap();
    assert_eq!(body["@odata.context"], json!(format!("{ROOT}/$metadata#Customers")));
    assert_eq!(body["@odata.count"], json!(3));
    assert_eq!(body["value"].as_array().unwrap().len(), 2);
    assert_eq!(body["value"][0]["Id"], json!("A1"));
}

#[tokio::test]
async fn reads_a_single_entity() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("Customers('B2')"))).await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.content_type(), Some("application/json"));
    let body = run.response.json().unwrap();
    assert_eq!(body["@odata.context"], json!(format!("{ROOT}/$metadata#Customers/$entity")));
    assert_eq!(body["Name"], json!("Bottom"));
}

#[tokio::test]
async fn missing_entity_is_404() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("Customers('ZZ')"))).await;

    assert_eq!(run.response.status, 404);
    assert_eq!(run.states, vec![Received, Parsed, Faulted, Rendered]);
    assert_eq!(run.response.json().unwrap()["error"]["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn count_renders_as_plain_text() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("Customers/$count"))).await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.content_type(), Some("text/plain"));
    assert_eq!(run.response.text(), "3");
}

#[tokio::test]
async fn entity_id_resolves_to_the_entity() {
    let h = harness();
    let run = h
        .pipeline
        .run(ODataRequest::get(url("$entity?$id=Customers('C3')")))
        .await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.json().unwrap()["Id"], json!("C3"));
}

#[tokio::test]
async fn create_returns_201_with_location() {
    let h = harness();
    let run = h
        .pipeline
        .run(post("Customers", r#"{"Id":"D4","Name":"Dora","Status":"Active"}"#))
        .await;

    assert_eq!(run.response.status, 201);
    assert_eq!(run.states, vec![Received, Parsed, Unmarshalled, Processed, Rendered]);
    assert_eq!(
        run.response.headers.get("location"),
        Some(format!("{ROOT}/Customers('D4')").as_str())
    );
    assert_eq!(run.response.json().unwrap()["Name"], json!("Dora"));
    assert_eq!(h.source.rows("Customers").len(), 4);
}

#[tokio::test]
async fn invalid_bodies_are_rejected_before_the_data_source() {
    let h = harness();

    let too_long = h
        .pipeline
        .run(post("Customers", r#"{"Id":"E5","Name":"far too long a name"}"#))
        .await;
    assert_eq!(too_long.response.status, 400);
    assert_eq!(too_long.states, vec![Received, Parsed, Faulted, Rendered]);

    let unknown = h.pipeline.run(post("Customers", r#"{"Id":"E5","Colour":"red"}"#)).await;
    assert_eq!(unknown.response.status, 400);

    let bad_enum = h.pipeline.run(post("Customers", r#"{"Id":"E5","Status":"Closed"}"#)).await;
    assert_eq!(bad_enum.response.status, 400);

    assert_eq!(h.source.rows("Customers").len(), 3);
    assert!(h.source.tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_key_is_a_conflict() {
    let h = harness();
    let run = h.pipeline.run(post("Customers", r#"{"Id":"A1"}"#)).await;

    assert_eq!(run.response.status, 409);
    let body = run.response.json().unwrap();
    assert_eq!(body["error"]["code"], json!("CONFLICT"));
    assert_eq!(body["error"]["target"], json!("Customers"));
}

#[tokio::test]
async fn patch_merges_and_delete_removes() {
    let h = harness();
    let patch = ODataRequest::new(Method::Patch, url("Customers('A1')"))
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"Name":"Alfie"}"#);
    let run = h.pipeline.run(patch).await;
    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.json().unwrap()["Status"], json!("Active"));

    let run = h
        .pipeline
        .run(ODataRequest::new(Method::Delete, url("Customers('A1')")))
        .await;
    assert_eq!(run.response.status, 204);
    assert_eq!(run.states, vec![Received, Parsed, Unmarshalled, Processed, Rendered]);
    assert_eq!(h.source.rows("Customers").len(), 2);
}

#[tokio::test]
async fn method_not_allowed_names_the_target() {
    let h = harness();
    let run = h
        .pipeline
        .run(ODataRequest::new(Method::Delete, url("Customers")))
        .await;

    assert_eq!(run.response.status, 405);
    assert_eq!(run.states, vec![Received, Parsed, Faulted, Rendered]);
    let body = run.response.json().unwrap();
    assert_eq!(body["error"]["code"], json!("METHOD_NOT_ALLOWED"));
    assert_eq!(body["error"]["target"], json!("Customers"));
}

#[tokio::test]
async fn unacceptable_media_type_is_406_in_minimal_json() {
    let h = harness();
    let run = h
        .pipeline
        .run(ODataRequest::get(url("Customers")).with_header("Accept", "text/csv"))
        .await;

    assert_eq!(run.response.status, 406);
    assert_eq!(run.response.content_type(), Some("application/json"));
    assert_eq!(run.response.json().unwrap()["error"]["code"], json!("NOT_ACCEPTABLE"));
}

#[tokio::test]
async fn errors_render_as_xml_when_asked() {
    let h = harness();
    let run = h
        .pipeline
        .run(ODataRequest::get(url("Nowhere")).with_header("Accept", "application/xml"))
        .await;

    assert_eq!(run.response.status, 400);
    assert_eq!(run.response.content_type(), Some("application/xml"));
    assert!(run.response.text().contains("<code>PARSE_ERROR</code>"));
    assert_eq!(run.states, vec![Received, Faulted, Rendered]);
}

#[tokio::test]
async fn unsupported_body_type_is_415() {
    let h = harness();
    let request = ODataRequest::new(Method::Post, url("Customers"))
        .with_header("Content-Type", "text/plain")
        .with_body("Id=Z9");
    let run = h.pipeline.run(request).await;

    assert_eq!(run.response.status, 415);
    assert_eq!(
        run.response.json().unwrap()["error"]["code"],
        json!("UNSUPPORTED_MEDIA_TYPE")
    );
}

#[tokio::test]
async fn actions_take_checked_parameters() {
    let h = harness();
    let run = h.pipeline.run(post("Reset", r#"{"reason":"nightly"}"#)).await;
    assert_eq!(run.response.status, 204);
    assert_eq!(run.response.body, ResponseBody::Empty);

    let missing = h.pipeline.run(post("Reset", "{}")).await;
    assert_eq!(missing.response.status, 400);

    let refused = h.pipeline.run(post("Reset", r#"{"reason":"fail"}"#)).await;
    assert_eq!(refused.response.status, 400);
    assert_eq!(refused.response.json().unwrap()["error"]["code"], json!("PROCESSING_ERROR"));

    let get = h.pipeline.run(ODataRequest::get(url("Reset"))).await;
    assert_eq!(get.response.status, 405);
}

#[tokio::test]
async fn access_token_reaches_the_data_source() {
    let h = harness();
    h.pipeline
        .run(ODataRequest::get(url("Customers")).with_header("Authorization", "Bearer s3cret"))
        .await;
    assert_eq!(
        *h.source.tokens.lock().unwrap(),
        vec![Some("s3cret".to_string())]
    );
}

#[tokio::test]
async fn service_document_lists_sets_and_function_imports() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(ROOT)).await;

    assert_eq!(run.response.status, 200);
    let body = run.response.json().unwrap();
    assert_eq!(body["@odata.context"], json!(format!("{ROOT}/$metadata")));
    let names: Vec<&str> = body["value"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert!(names.contains(&"Customers"));
    assert!(names.contains(&"Orders"));
    assert!(names.contains(&"TopCustomers"));
}

#[tokio::test]
async fn metadata_is_csdl_xml() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("$metadata"))).await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.content_type(), Some("application/xml"));
    let xml = run.response.text();
    assert!(xml.contains(r#"<EntitySet Name="Customers" EntityType="Demo.Customer">"#));
    assert!(xml.contains(r#"<EnumType Name="Status""#));

    let json_only = h
        .pipeline
        .run(ODataRequest::get(url("$metadata")).with_header("Accept", "application/json"))
        .await;
    assert_eq!(json_only.response.status, 406);
}

#[tokio::test]
async fn streaming_preference_chunks_the_collection() {
    let h = harness();
    let run = h
        .pipeline
        .run(
            ODataRequest::get(url("Customers"))
                .with_header("Prefer", "odata.streaming, odata.maxpagesize=2"),
        )
        .await;

    assert_eq!(run.response.status, 200);
    let ResponseBody::Chunked(chunks) = &run.response.body else {
        panic!("expected a chunked body, got {:?}", run.response.body);
    };
    assert_eq!(chunks.len(), 4);
    let body = run.response.json().unwrap();
    assert_eq!(body["value"].as_array().unwrap().len(), 3);
    assert_eq!(body["@odata.context"], json!(format!("{ROOT}/$metadata#Customers")));
}

#[tokio::test]
async fn function_import_returns_entities_of_its_set() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("TopCustomers(count=2)"))).await;

    assert_eq!(run.response.status, 200);
    let body = run.response.json().unwrap();
    assert_eq!(body["@odata.context"], json!(format!("{ROOT}/$metadata#Customers")));
    assert_eq!(body["value"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn format_overrides_accept() {
    let h = harness();
    let run = h
        .pipeline
        .run(ODataRequest::get(url("Customers?$format=json")).with_header("Accept", "application/xml"))
        .await;
    assert_eq!(run.response.status, 200);
    assert_eq!(run.response.content_type(), Some("application/json"));
}
