//! Multipart decomposition.
//!
//! ```text
//! --batch_1
//! Content-Type: application/http
//! Content-Transfer-Encoding: binary
//!
//! GET Customers('A1') HTTP/1.1
//! Accept: application/json
//!
//! --batch_1
//! Content-Type: multipart/mixed; boundary=changeset_1
//!
//! --changeset_1
//! Content-Type: application/http
//! Content-Transfer-Encoding: binary
//! Content-ID: 1
//!
//! POST Customers HTTP/1.1
//! ...
//! --changeset_1--
//! --batch_1--
//! ```
//!
//! Both `\r\n` and bare `\n` line endings are accepted.

use std::collections::HashSet;

use tracing::debug;

use super::{BatchError, BatchRequest, BatchRequestContent, RequestComponent};
use crate::request::{Headers, Method};

/// Extract the boundary parameter of a `multipart/mixed` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, BatchError> {
    let mut params = content_type.split(';');
    let media = params.next().unwrap_or_default().trim();
    if !media.eq_ignore_ascii_case("multipart/mixed") {
        return Err(BatchError::MissingBoundary(format!(
            "content type '{media}' is not multipart/mixed"
        )));
    }
    params
        .filter_map(|p| p.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| BatchError::MissingBoundary("no boundary parameter".to_string()))
}

/// Decompose a batch body into ordered components.
///
/// `max_requests` caps the total number of requests, changeset members
/// included.
pub fn parse_batch(
    body: &str,
    boundary: &str,
    max_requests: usize,
) -> Result<BatchRequestContent, BatchError> {
    let parts = split_parts(body, boundary).map_err(|(part, reason)| BatchError::malformed(part, reason))?;

    let mut content = BatchRequestContent::default();
    for (index, part) in parts.into_iter().enumerate() {
        let (head, rest) = split_head(part);
        let headers = parse_headers(head).map_err(|reason| BatchError::malformed(index, reason))?;
        let content_type = headers.get("content-type").unwrap_or_default().to_string();

        let component = if is_media(&content_type, "application/http") {
            let request = parse_http_part(index, &headers, rest)?;
            if let Some(reference) = request.content_id_reference() {
                return Err(BatchError::UnresolvedContentId {
                    part: index,
                    reference: reference.to_string(),
                });
            }
            RequestComponent::Request(request)
        } else if is_media(&content_type, "multipart/mixed") {
            parse_changeset(index, &content_type, rest)?
        } else {
            return Err(BatchError::NotHttp {
                part: index,
                content_type,
            });
        };

        content.components.push(component);
        if content.request_count() > max_requests {
            return Err(BatchError::TooManyRequests { limit: max_requests });
        }
    }

    debug!(
        components = content.len(),
        requests = content.request_count(),
        "decomposed batch"
    );
    Ok(content)
}

fn parse_changeset(index: usize, content_type: &str, body: &str) -> Result<RequestComponent, BatchError> {
    let boundary = boundary_from_content_type(content_type)
        .map_err(|e| BatchError::malformed(index, e.to_string()))?;
    let parts = split_parts(body, &boundary)
        .map_err(|(member, reason)| BatchError::malformed(index, format!("changeset part {member}: {reason}")))?;

    let mut requests: Vec<BatchRequest> = Vec::with_capacity(parts.len());
    let mut content_ids = HashSet::new();
    for (member, part) in parts.into_iter().enumerate() {
        let (head, rest) = split_head(part);
        let headers = parse_headers(head)
            .map_err(|reason| BatchError::malformed(index, format!("changeset part {member}: {reason}")))?;
        let content_type = headers.get("content-type").unwrap_or_default();
        if !is_media(content_type, "application/http") {
            return Err(BatchError::NotHttp {
                part: index,
                content_type: content_type.to_string(),
            });
        }
        let request = parse_http_part(index, &headers, rest)?;
        if request.method == Method::Get {
            return Err(BatchError::malformed(
                index,
                format!("changeset part {member}: GET is not allowed inside a changeset"),
            ));
        }
        if let Some(reference) = request.content_id_reference() {
            if !content_ids.contains(reference) {
                return Err(BatchError::UnresolvedContentId {
                    part: index,
                    reference: reference.to_string(),
                });
            }
        }
        if let Some(id) = &request.content_id {
            if !content_ids.insert(id.clone()) {
                return Err(BatchError::malformed(
                    index,
                    format!("changeset part {member}: duplicate Content-ID '{id}'"),
                ));
            }
        }
        requests.push(request);
    }

    Ok(RequestComponent::Changeset { boundary, requests })
}

/// An `application/http` part: request line, headers, blank line, body.
fn parse_http_part(index: usize, part_headers: &Headers, text: &str) -> Result<BatchRequest, BatchError> {
    let encoding = part_headers.get("content-transfer-encoding").unwrap_or_default();
    if !encoding.eq_ignore_ascii_case("binary") {
        return Err(BatchError::malformed(
            index,
            "application/http parts require Content-Transfer-Encoding: binary",
        ));
    }

    let text = text.trim_start_matches(['\r', '\n']);
    let (request_line, rest) = text.split_once('\n').unwrap_or((text, ""));
    let mut words = request_line.trim_end_matches('\r').split_whitespace();
    let (Some(method), Some(url)) = (words.next(), words.next()) else {
        return Err(BatchError::malformed(index, format!("malformed request line '{request_line}'")));
    };
    if let Some(version) = words.next() {
        if !version.starts_with("HTTP/") {
            return Err(BatchError::malformed(index, format!("unknown protocol '{version}'")));
        }
    }
    let method: Method = method.parse().map_err(|e: String| BatchError::malformed(index, e))?;
    if url.trim_end_matches('/').ends_with("$batch") {
        return Err(BatchError::malformed(index, "nested $batch requests are not allowed"));
    }

    let (head, body) = split_head(rest);
    let headers = parse_headers(head).map_err(|reason| BatchError::malformed(index, reason))?;
    let content_id = part_headers
        .get("content-id")
        .or_else(|| headers.get("content-id"))
        .map(str::to_string);

    Ok(BatchRequest {
        method,
        url: url.to_string(),
        headers,
        body: Some(body.to_string()).filter(|b| !b.is_empty()),
        content_id,
    })
}

fn is_media(content_type: &str, media: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|m| m.trim().eq_ignore_ascii_case(media))
}

/// Split on `--boundary` delimiter lines up to the `--boundary--` close.
/// The line break before each delimiter belongs to the delimiter.
/// Only blank lines may precede the first delimiter.
/// Errors carry the index of the part that could not be framed.
fn split_parts<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>, (usize, String)> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end();
        let closing = trimmed == close;
        if trimmed != delimiter && !closing {
            if start.is_none() && !trimmed.is_empty() {
                return Err((0, format!("expected delimiter '{delimiter}', found '{trimmed}'")));
            }
            continue;
        }
        if let Some(begin) = start {
            parts.push(strip_line_break(&body[begin..line_start]));
        }
        if closing {
            return Ok(parts);
        }
        start = Some(offset);
    }

    match start {
        None => Err((0, format!("boundary delimiter '{delimiter}' not found"))),
        Some(_) => Err((parts.len(), format!("missing closing delimiter '{close}'"))),
    }
}

fn strip_line_break(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

/// Split at the first empty line into (headers, body).
fn split_head(text: &str) -> (&str, &str) {
    if let Some(body) = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n')) {
        return ("", body);
    }
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let lf = text.find("\n\n").map(|i| (i, 2));
    let first = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match first {
        Some((i, len)) => (&text[..i], &text[i + len..]),
        None if text.trim().is_empty() => ("", ""),
        None if text.contains(':') => (text, ""),
        None => ("", text),
    }
}

fn parse_headers(head: &str) -> Result<Headers, String> {
    let mut headers = Headers::new();
    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header line '{line}'"))?;
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}
