//! OData `multipart/mixed` envelope of the REST `$batch` endpoint.
//!
//! Reads are written as top-level parts. Each run of consecutive writes goes
//! into one change set, so the service applies it atomically. Responses come
//! back positionally, change set responses nested the same way.

use super::{EnvelopeError, SubRequest, SubResponse};
use bytes::Bytes;

pub const ACCEPT: &str = "application/json;odata=nometadata";
pub const JSON_CONTENT_TYPE: &str = "application/json;odata=nometadata";

/// Encoded request body with its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestBatch {
    pub boundary: String,
    pub body: String,
}

impl RestBatch {
    /// `Content-Type` of the batch call
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }
}

#[must_use]
pub fn encode(requests: &[SubRequest]) -> RestBatch {
    let boundary = format!("batch_{}", uuid::Uuid::new_v4());
    let mut lines: Vec<String> = Vec::new();

    let mut index = 0;
    while index < requests.len() {
        lines.push(format!("--{boundary}"));
        if requests[index].is_read() {
            http_part(&mut lines, &requests[index]);
            index += 1;
            continue;
        }

        let changeset = format!("changeset_{}", uuid::Uuid::new_v4());
        lines.push(format!("Content-Type: multipart/mixed; boundary={changeset}"));
        lines.push(String::new());
        while index < requests.len() && !requests[index].is_read() {
            lines.push(format!("--{changeset}"));
            http_part(&mut lines, &requests[index]);
            index += 1;
        }
        lines.push(format!("--{changeset}--"));
    }
    lines.push(format!("--{boundary}--"));
    lines.push(String::new());

    RestBatch {
        boundary,
        body: lines.join("\r\n"),
    }
}

fn http_part(lines: &mut Vec<String>, request: &SubRequest) {
    lines.push("Content-Type: application/http".to_owned());
    lines.push("Content-Transfer-Encoding: binary".to_owned());
    lines.push(String::new());
    lines.push(format!("{} {} HTTP/1.1", request.method, request.url));
    lines.push(format!("Accept: {ACCEPT}"));
    match &request.body {
        Some(body) => {
            lines.push(format!("Content-Type: {JSON_CONTENT_TYPE}"));
            lines.push(String::new());
            lines.push(body.to_string());
        }
        None => lines.push(String::new()),
    }
}

/// Split a batch response into sub-responses in request order; `expected`
/// is the number of requests sent, missing answers are `None`.
///
/// # Errors
/// [`EnvelopeError`] when the content type carries no boundary or a part is
/// not an HTTP response.
pub fn decode(
    content_type: Option<&str>,
    body: &[u8],
    expected: usize,
) -> Result<Vec<Option<SubResponse>>, EnvelopeError> {
    let boundary = content_type
        .and_then(boundary_of)
        .ok_or_else(|| {
            EnvelopeError(format!(
                "batch response without multipart boundary, content type '{}'",
                content_type.unwrap_or_default()
            ))
        })?;
    let text = String::from_utf8_lossy(body);

    let mut responses = Vec::with_capacity(expected);
    collect_responses(&text, &boundary, &mut responses)?;
    if responses.len() > expected {
        return Err(EnvelopeError(format!(
            "batch response has {} parts for {expected} requests",
            responses.len()
        )));
    }

    let mut slots: Vec<Option<SubResponse>> = responses.into_iter().map(Some).collect();
    slots.resize(expected, None);
    Ok(slots)
}

fn boundary_of(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART {
        return None;
    }
    mime.get_param(mime::BOUNDARY).map(|b| b.as_str().to_owned())
}

fn collect_responses(text: &str, boundary: &str, out: &mut Vec<SubResponse>) -> Result<(), EnvelopeError> {
    for part in parts(text, boundary) {
        let (headers, content) = split_head(part);
        if let Some(nested) = header(headers, "content-type").and_then(boundary_of) {
            collect_responses(content, &nested, out)?;
        } else {
            out.push(http_response(content)?);
        }
    }
    Ok(())
}

/// Parts between `--boundary` delimiters, without the preamble and epilogue.
fn parts<'a>(text: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{boundary}");
    text.split(delimiter.as_str())
        .skip(1)
        .take_while(|chunk| !chunk.starts_with("--"))
        .map(|chunk| {
            let chunk = chunk.strip_prefix("\r\n").or_else(|| chunk.strip_prefix('\n')).unwrap_or(chunk);
            chunk
                .strip_suffix("\r\n")
                .or_else(|| chunk.strip_suffix('\n'))
                .unwrap_or(chunk)
        })
        .collect()
}

fn split_head(part: &str) -> (&str, &str) {
    if let Some(at) = part.find("\r\n\r\n") {
        return (&part[..at], &part[at + 4..]);
    }
    if let Some(at) = part.find("\n\n") {
        return (&part[..at], &part[at + 2..]);
    }
    (part, "")
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn http_response(content: &str) -> Result<SubResponse, EnvelopeError> {
    let (head, body) = split_head(content);
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|_| status_line.starts_with("HTTP/"))
        .ok_or_else(|| EnvelopeError(format!("invalid status line in batch part: '{status_line}'")))?;
    Ok(SubResponse {
        status,
        body: Bytes::copy_from_slice(body.trim_end_matches(['\r', '\n']).as_bytes()),
    })
}
