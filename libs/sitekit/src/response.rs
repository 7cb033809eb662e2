use bytes::Bytes;
use serde_json::Value;
use sitekit_csom::ClientValue;
use sitekit_odata::{EntityMetadata, Protocol};

/// Parsed payload of one resolved request
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    /// No body (`204`, or a write without a return value)
    Empty,
    Json(Value),
    Csom(ClientValue),
}

/// Successful answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Protocol that actually answered; a Graph request may be served by its
    /// REST backup
    pub protocol: Protocol,
    pub status: u16,
    /// Raw sub-response body; empty for CSOM, whose values come from a shared document
    pub body: Bytes,
    pub value: ResponseValue,
}

impl ResponseEnvelope {
    /// Parse a JSON sub-response. Bodies that are not JSON are kept raw with
    /// an [`ResponseValue::Empty`] value.
    #[must_use]
    pub fn from_json_body(protocol: Protocol, status: u16, body: Bytes) -> Self {
        let value = if body.iter().all(u8::is_ascii_whitespace) {
            ResponseValue::Empty
        } else {
            serde_json::from_slice(&body).map_or(ResponseValue::Empty, ResponseValue::Json)
        };
        Self {
            protocol,
            status,
            body,
            value,
        }
    }

    #[must_use]
    pub fn csom(value: ClientValue) -> Self {
        Self {
            protocol: Protocol::Csom,
            status: 200,
            body: Bytes::new(),
            value: ResponseValue::Csom(value),
        }
    }

    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.value {
            ResponseValue::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn client_value(&self) -> Option<&ClientValue> {
        match &self.value {
            ResponseValue::Csom(v) => Some(v),
            _ => None,
        }
    }

    /// Items of an OData collection (`value` array), if the payload is one
    #[must_use]
    pub fn collection(&self) -> Option<&[Value]> {
        self.json()?
            .get("value")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    /// Copy whose JSON payload uses the logical property names of `metadata`
    /// instead of the wire names of [`ResponseEnvelope::protocol`].
    ///
    /// Collections (`value` arrays) are mapped item by item and expanded
    /// navigation properties with the metadata of their target. Names the
    /// table does not know are kept as they are.
    #[must_use]
    pub fn to_logical(&self, metadata: &EntityMetadata) -> Self {
        let ResponseValue::Json(value) = &self.value else {
            return self.clone();
        };
        Self {
            protocol: self.protocol,
            status: self.status,
            body: self.body.clone(),
            value: ResponseValue::Json(logical_json(value, metadata, self.protocol)),
        }
    }
}

fn logical_json(value: &Value, metadata: &EntityMetadata, protocol: Protocol) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| logical_json(item, metadata, protocol))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(name, value)| match metadata.field_by_wire_name(protocol, name) {
                    Some(field) => {
                        let value = match field.target_metadata() {
                            Some(target) if field.expandable => logical_json(value, target, protocol),
                            _ => value.clone(),
                        };
                        (field.name.to_owned(), value)
                    }
                    None if name == "value" && value.is_array() => {
                        (name.clone(), logical_json(value, metadata, protocol))
                    }
                    None => (name.clone(), value.clone()),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
