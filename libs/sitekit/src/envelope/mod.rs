//! Batch envelopes: many sub-requests in one HTTP call.

pub mod graph;
pub mod rest;

use bytes::Bytes;
use http::Method;

/// Envelope that could not be read
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EnvelopeError(pub String);

/// One request inside a batch envelope
#[derive(Debug, Clone, PartialEq)]
pub struct SubRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl SubRequest {
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// One response inside a batch envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub body: Bytes,
}

impl SubResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
