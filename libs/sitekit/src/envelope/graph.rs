//! JSON `$batch` envelope of the Graph API.

use super::{EnvelopeError, SubRequest, SubResponse};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<BatchItem<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchItem<'a> {
    id: String,
    method: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'static str, &'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    responses: Vec<ResponseItem>,
}

#[derive(Debug, Deserialize)]
struct ResponseItem {
    id: String,
    status: u16,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

/// Encode `requests` with ids `"1"..="n"` in order. URLs are sent relative to
/// `graph_root`.
///
/// # Errors
/// [`EnvelopeError`] if the document cannot be serialized.
pub fn encode(requests: &[SubRequest], graph_root: &str) -> Result<Vec<u8>, EnvelopeError> {
    let root = graph_root.trim_end_matches('/');
    let requests = requests
        .iter()
        .enumerate()
        .map(|(index, request)| BatchItem {
            id: (index + 1).to_string(),
            method: request.method.as_str(),
            url: request
                .url
                .strip_prefix(root)
                .unwrap_or(&request.url),
            headers: if request.body.is_some() {
                BTreeMap::from([("Content-Type", "application/json")])
            } else {
                BTreeMap::new()
            },
            body: request.body.as_ref(),
        })
        .collect();
    serde_json::to_vec(&BatchRequest { requests }).map_err(|e| EnvelopeError(e.to_string()))
}

/// Match responses to requests by id; requests without an answer are `None`.
///
/// # Errors
/// [`EnvelopeError`] when the body is not a `$batch` response.
pub fn decode(body: &[u8], expected: usize) -> Result<Vec<Option<SubResponse>>, EnvelopeError> {
    let response: BatchResponse =
        serde_json::from_slice(body).map_err(|e| EnvelopeError(format!("invalid $batch response: {e}")))?;

    let mut slots: Vec<Option<SubResponse>> = vec![None; expected];
    for item in response.responses {
        let Some(index) = item
            .id
            .parse::<usize>()
            .ok()
            .and_then(|id| id.checked_sub(1))
            .filter(|index| *index < expected)
        else {
            tracing::debug!(id = %item.id, "ignoring $batch response with unknown id");
            continue;
        };
        let body = match item.body {
            None | Some(serde_json::Value::Null) => Bytes::new(),
            Some(value) => Bytes::from(serde_json::to_vec(&value).map_err(|e| EnvelopeError(e.to_string()))?),
        };
        slots[index] = Some(SubResponse {
            status: item.status,
            body,
        });
    }
    Ok(slots)
}
