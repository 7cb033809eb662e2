//! `ProcessQuery` response decoding.
//!
//! The body is a flat JSON array. Element 0 is the document header; an
//! integer naming a later action opens that action's block, and the elements
//! up to the next such header are its payload.

use crate::encoder::{Action, Document};
use crate::error::{CsomError, ServerError};
use crate::value::ClientValue;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub schema_version: Option<String>,
    pub library_version: Option<String>,
    pub trace_correlation_id: Option<String>,
    /// Document-level exception
    pub error: Option<ServerError>,
}

/// Per-request outcome of one document, indexed like the encoded requests.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub header: ResponseHeader,
    pub results: Vec<Result<ClientValue, CsomError>>,
}

impl DecodedResponse {
    #[must_use]
    pub fn result(&self, request: usize) -> Option<&Result<ClientValue, CsomError>> {
        self.results.get(request)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(Result::is_err)
    }
}

/// Decode `body` against the document it answers.
///
/// # Errors
/// [`CsomError::Malformed`] when the body is not a JSON array starting with a
/// header object. Failures of individual actions are reported in
/// [`DecodedResponse::results`].
pub fn decode(document: &Document, body: &[u8]) -> Result<DecodedResponse, CsomError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| CsomError::Malformed(e.to_string()))?;
    let Value::Array(elements) = value else {
        return Err(CsomError::Malformed("expected a JSON array".to_owned()));
    };
    let mut elements = elements.into_iter();
    let header = match elements.next() {
        Some(Value::Object(header)) => parse_header(&header),
        _ => return Err(CsomError::Malformed("missing response header".to_owned())),
    };

    let blocks = split_blocks(document, elements);
    let mut results = Vec::with_capacity(document.actions.len());
    let mut failed: Vec<(u32, u32)> = Vec::new();

    for action in &document.actions {
        let result = match blocks.get(&action.id) {
            Some(payload) => payload_result(action.id, payload),
            None => Err(CsomError::MissingResponse { action: action.id }),
        };
        if matches!(result, Err(CsomError::Server { .. })) {
            failed.push((action.id, action.path_id));
        }
        results.push(result);
    }

    // A document-level error belongs to the first action that got no block.
    if let Some(error) = &header.error
        && let Some(index) = document
            .actions
            .iter()
            .position(|a| !blocks.contains_key(&a.id))
    {
        let action = &document.actions[index];
        results[index] = Err(CsomError::Server {
            action: action.id,
            error: error.clone(),
        });
        failed.push((action.id, action.path_id));
    }

    for (index, action) in document.actions.iter().enumerate() {
        if matches!(results[index], Err(CsomError::Server { .. })) {
            continue;
        }
        if let Some(&(failed_id, _)) = failed
            .iter()
            .find(|(id, path_id)| *id != action.id && action.depends_on_path(*path_id))
        {
            results[index] = Err(CsomError::DependencyFailed {
                action: action.id,
                failed: failed_id,
            });
        }
    }

    for (action, result) in document.actions.iter().zip(&results) {
        if let Err(error) = result {
            tracing::warn!(action = action.id, request = action.request, %error, "CSOM action failed");
        }
    }

    Ok(DecodedResponse { header, results })
}

/// Action ids arrive in ascending order, and an action that returns a value
/// always has its payload before the next id. An integer is therefore a
/// header only when it names a later action and the open block is not still
/// waiting for its payload.
fn split_blocks(
    document: &Document,
    elements: impl Iterator<Item = Value>,
) -> HashMap<u32, Vec<Value>> {
    let mut blocks: HashMap<u32, Vec<Value>> = HashMap::new();
    let mut current: Option<&Action> = None;

    for element in elements {
        let awaiting_payload = current.is_some_and(|action| {
            action.operation.returns_value() && blocks.get(&action.id).is_some_and(Vec::is_empty)
        });
        let header = element
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|id| !awaiting_payload && current.is_none_or(|action| *id > action.id))
            .and_then(|id| document.action(id));
        if let Some(action) = header {
            blocks.insert(action.id, Vec::new());
            current = Some(action);
            continue;
        }
        match current.and_then(|action| blocks.get_mut(&action.id)) {
            Some(payload) => payload.push(element),
            None => tracing::debug!("ignoring payload before the first action header"),
        }
    }

    blocks
}

fn payload_result(action: u32, payload: &[Value]) -> Result<ClientValue, CsomError> {
    if let Some(error) = payload.iter().find_map(|v| v.get("ErrorInfo").and_then(server_error)) {
        return Err(CsomError::Server { action, error });
    }
    Ok(match payload {
        [] => ClientValue::Null,
        [single] => ClientValue::from_json(single.clone()),
        many => ClientValue::Array(many.iter().cloned().map(ClientValue::from_json).collect()),
    })
}

fn parse_header(header: &serde_json::Map<String, Value>) -> ResponseHeader {
    let text = |key: &str| header.get(key).and_then(Value::as_str).map(str::to_owned);
    let trace_correlation_id = text("TraceCorrelationId");
    let error = header.get("ErrorInfo").and_then(server_error).map(|mut e| {
        if e.correlation_id.is_none() {
            e.correlation_id.clone_from(&trace_correlation_id);
        }
        e
    });
    ResponseHeader {
        schema_version: text("SchemaVersion"),
        library_version: text("LibraryVersion"),
        trace_correlation_id,
        error,
    }
}

fn server_error(info: &Value) -> Option<ServerError> {
    let info = info.as_object()?;
    let text = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };
    Some(ServerError {
        code: info.get("ErrorCode").and_then(Value::as_i64).unwrap_or(0),
        type_name: text("ErrorTypeName"),
        message: text("ErrorMessage"),
        correlation_id: info
            .get("TraceCorrelationId")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}
