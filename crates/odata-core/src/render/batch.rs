//! `multipart/mixed` batch responses.
//!
//! The response mirrors the request: one `application/http` part per
//! request, changesets nested under their own boundary. A changeset that
//! failed is reported as a single error part in its place.

use std::fmt::{self, Write};

use crate::request::ODataResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResponsePart {
    Response {
        response: ODataResponse,
        content_id: Option<String>,
    },
    Changeset {
        boundary: String,
        responses: Vec<(ODataResponse, Option<String>)>,
    },
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        412 => "Precondition Failed",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "",
    }
}

fn write_http_part(
    out: &mut String,
    boundary: &str,
    response: &ODataResponse,
    content_id: Option<&str>,
) -> fmt::Result {
    write!(out, "--{boundary}\r\n")?;
    out.push_str("Content-Type: application/http\r\n");
    out.push_str("Content-Transfer-Encoding: binary\r\n");
    if let Some(id) = content_id {
        write!(out, "Content-ID: {id}\r\n")?;
    }
    out.push_str("\r\n");
    write!(
        out,
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    )?;
    for (name, value) in response.headers.iter() {
        write!(out, "{}: {value}\r\n", header_case(name))?;
    }
    out.push_str("\r\n");
    let body = response.text();
    if !body.is_empty() {
        out.push_str(&body);
        out.push_str("\r\n");
    }
    Ok(())
}

/// `content-type` → `Content-Type`
fn header_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub fn write_batch_response(boundary: &str, parts: &[BatchResponsePart]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for part in parts {
        match part {
            BatchResponsePart::Response {
                response,
                content_id,
            } => write_http_part(&mut out, boundary, response, content_id.as_deref())?,
            BatchResponsePart::Changeset {
                boundary: inner,
                responses,
            } => {
                write!(out, "--{boundary}\r\n")?;
                write!(out, "Content-Type: multipart/mixed; boundary={inner}\r\n\r\n")?;
                for (response, content_id) in responses {
                    write_http_part(&mut out, inner, response, content_id.as_deref())?;
                }
                write!(out, "--{inner}--\r\n")?;
            }
        }
    }
    write!(out, "--{boundary}--\r\n")?;
    Ok(out)
}
