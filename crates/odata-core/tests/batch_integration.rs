//! `$batch` through the full pipeline: fan-out order, changeset atomicity,
//! Content-ID references.

mod common;

use common::{harness, url, ROOT};
use odata_core::request::{Method, ODataRequest};
use odata_core::PipelineState::{Parsed, Processed, Received, Rendered};
use serde_json::json;

fn batch(body: &str) -> ODataRequest {
    ODataRequest::new(Method::Post, url("$batch"))
        .with_header("Content-Type", "multipart/mixed; boundary=batch_1")
        .with_header("Authorization", "Bearer outer")
        .with_body(body)
}

fn get_part(relative: &str) -> String {
    get_part_accepting(relative, "application/json")
}

fn get_part_accepting(relative: &str, accept: &str) -> String {
    format!(
        "--batch_1\r\n\
Content-Type: application/http\r\n\
Content-Transfer-Encoding: binary\r\n\
\r\n\
GET {relative} HTTP/1.1\r\n\
Accept: {accept}\r\n\
\r\n\
\r\n"
    )
}

fn changeset(members: &[String]) -> String {
    let mut out = String::from("--batch_1\r\nContent-Type: multipart/mixed; boundary=cs_1\r\n\r\n");
    for member in members {
        out.push_str(member);
    }
    out.push_str("--cs_1--\r\n");
    out
}

fn member(method: &str, relative: &str, content_id: Option<&str>, body: Option<&str>) -> String {
    let mut out = String::from(
        "--cs_1\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n",
    );
    if let Some(id) = content_id {
        out.push_str(&format!("Content-ID: {id}\r\n"));
    }
    out.push_str(&format!("\r\n{method} {relative} HTTP/1.1\r\n"));
    match body {
        Some(body) => out.push_str(&format!("Content-Type: application/json\r\n\r\n{body}\r\n")),
        None => out.push_str("\r\n\r\n"),
    }
    out
}

#[tokio::test]
async fn responses_mirror_request_order() {
    let h = harness();
    let body = format!(
        "{}{}{}--batch_1--\r\n",
        get_part("Customers('A1')"),
        get_part("Customers('ZZ')"),
        get_part_accepting("Orders/$count", "text/plain"),
    );
    let run = h.pipeline.run(batch(&body)).await;

    assert_eq!(run.response.status, 200);
    assert_eq!(run.states, vec![Received, Parsed, Processed, Rendered]);
    assert!(run
        .response
        .content_type()
        .unwrap()
        .starts_with("multipart/mixed; boundary=batchresponse_"));

    let text = run.response.text();
    let ok = text.find("HTTP/1.1 200 OK").unwrap();
    let missing = text.find("HTTP/1.1 404 Not Found").unwrap();
    let count = text.rfind("HTTP/1.1 200 OK").unwrap();
    assert!(ok < missing && missing < count);
    assert!(text.contains("\"Alfreds\""));
    assert!(text[count..].contains("Content-Type: text/plain"));
    assert!(!text.contains("Not Acceptable"));
    assert!(text.trim_end().ends_with("--"));
}

#[tokio::test]
async fn changeset_commits_with_content_id_substitution() {
    let h = harness();
    let body = format!(
        "{}{}--batch_1--\r\n",
        get_part("Customers/$count"),
        changeset(&[
            member("POST", "Customers", Some("1"), Some(r#"{"Id":"D4","Name":"Dora"}"#)),
            member("PATCH", "$1", Some("2"), Some(r#"{"Status":"Dormant"}"#)),
        ]),
    );
    let run = h.pipeline.run(batch(&body)).await;

    assert_eq!(run.response.status, 200);
    let text = run.response.text();
    assert!(text.contains("boundary=changesetresponse_"));
    assert!(text.contains("HTTP/1.1 201 Created"));
    assert!(text.contains(&format!("Location: {ROOT}/Customers('D4')")));
    assert!(text.contains("Content-ID: 1\r\n"));
    assert!(text.contains("Content-ID: 2\r\n"));

    let rows = h.source.rows("Customers");
    let created = rows.iter().find(|c| c["Id"] == json!("D4")).unwrap();
    assert_eq!(created["Name"], json!("Dora"));
    assert_eq!(created["Status"], json!("Dormant"));
}

#[tokio::test]
async fn failed_changeset_rolls_back_and_reports_one_error() {
    let h = harness();
    let body = format!(
        "{}--batch_1--\r\n",
        changeset(&[
            member("POST", "Customers", Some("1"), Some(r#"{"Id":"D4"}"#)),
            member("DELETE", "Customers('ZZ')", None, None),
        ]),
    );
    let run = h.pipeline.run(batch(&body)).await;

    assert_eq!(run.response.status, 200);
    let text = run.response.text();
    assert!(!text.contains("changesetresponse_"));
    assert!(!text.contains("201 Created"));
    assert!(text.contains("HTTP/1.1 404 Not Found"));
    assert!(text.contains("NOT_FOUND"));

    assert_eq!(h.source.rows("Customers").len(), 3);
}

#[tokio::test]
async fn members_inherit_the_outer_authorization() {
    let h = harness();
    let body = format!(
        "{}{}--batch_1--\r\n",
        get_part("Customers"),
        changeset(&[member("DELETE", "Orders(1)", None, None)]),
    );
    let run = h.pipeline.run(batch(&body)).await;
    assert_eq!(run.response.status, 200);

    let tokens = h.source.tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(|t| t.as_deref() == Some("outer")));
    assert_eq!(h.source.rows("Orders").len(), 1);
}

#[tokio::test]
async fn malformed_batches_fail_as_a_whole() {
    let h = harness();

    let no_boundary = ODataRequest::new(Method::Post, url("$batch"))
        .with_header("Content-Type", "multipart/mixed")
        .with_body(get_part("Customers"));
    let run = h.pipeline.run(no_boundary).await;
    assert_eq!(run.response.status, 400);
    assert_eq!(run.response.json().unwrap()["error"]["code"], json!("BATCH_FORMAT"));

    let dangling = format!(
        "{}--batch_1--\r\n",
        changeset(&[member("PATCH", "$9", None, Some("{}"))]),
    );
    let run = h.pipeline.run(batch(&dangling)).await;
    assert_eq!(run.response.status, 400);
    assert!(h.source.tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn count_part_asking_for_json_is_not_acceptable() {
    let h = harness();
    let body = format!(
        "{}{}--batch_1--\r\n",
        get_part("Orders/$count"),
        get_part("Customers('A1')"),
    );
    let run = h.pipeline.run(batch(&body)).await;

    assert_eq!(run.response.status, 200);
    let text = run.response.text();
    let refused = text.find("HTTP/1.1 406 Not Acceptable").unwrap();
    let ok = text.find("HTTP/1.1 200 OK").unwrap();
    assert!(refused < ok);
}

#[tokio::test]
async fn batch_only_accepts_post() {
    let h = harness();
    let run = h.pipeline.run(ODataRequest::get(url("$batch"))).await;
    assert_eq!(run.response.status, 405);
}
