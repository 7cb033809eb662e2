//! Error taxonomy of the request pipeline.
//!
//! Every failure a caller can observe is a [`SiteError`]. Errors are `Clone`
//! because one failure can fault many response slots.

use sitekit_csom::CsomError;
use sitekit_http::HttpError;
use sitekit_odata::Protocol;
use std::fmt;

pub use sitekit_odata::Error as ClientError;

/// Non-success answer of a service, one per failed sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub protocol: Protocol,
    pub status: u16,
    /// Service error code (`itemNotFound`, `-2147024894, System.IO...`)
    pub code: Option<String>,
    pub message: String,
    /// `METHOD url` of the failed request
    pub request: String,
}

impl ServiceError {
    /// Build from an error response body, reading the OData error object when
    /// there is one and falling back to the raw text.
    #[must_use]
    pub fn from_response(protocol: Protocol, request: impl Into<String>, status: u16, body: &[u8]) -> Self {
        let (code, message) = parse_error_body(body);
        Self {
            protocol,
            status,
            code,
            message,
            request: request.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "protocol={} status={} code={} request=\"{}\" message=\"{}\"",
            self.protocol,
            self.status,
            self.code.as_deref().unwrap_or("-"),
            self.request,
            self.message
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SiteError {
    /// The request could not be built; never retried
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("service error: {0}")]
    Service(ServiceError),

    /// The credential provider failed; never retried
    #[error("authentication error: protocol={protocol} request=\"{request}\" message=\"{message}\"")]
    Authentication {
        protocol: Protocol,
        request: String,
        message: String,
    },

    /// Execution was canceled before the request resolved
    #[error("canceled: request=\"{request}\"")]
    Canceled { request: String },

    #[error("transport error: protocol={protocol} request=\"{request}\" message=\"{message}\"")]
    Transport {
        protocol: Protocol,
        request: String,
        message: String,
    },

    /// A request envelope could not be built, or the service answered with
    /// one that could not be read
    #[error("protocol error: protocol={protocol} request=\"{request}\" message=\"{message}\"")]
    Protocol {
        protocol: Protocol,
        request: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SiteError {
    /// Map a transport failure of `request` sent over `protocol`.
    #[must_use]
    pub fn from_http(protocol: Protocol, request: &str, err: &HttpError) -> Self {
        match err {
            HttpError::RetriesExhausted {
                status, body_preview, ..
            } => Self::Service(ServiceError::from_response(
                protocol,
                request,
                status.as_u16(),
                body_preview.as_bytes(),
            )),
            HttpError::Authentication { message, .. } => Self::Authentication {
                protocol,
                request: request.to_owned(),
                message: message.clone(),
            },
            HttpError::InvalidScheme { .. } | HttpError::InvalidUri { .. } => Self::Config(err.to_string()),
            _ => Self::Transport {
                protocol,
                request: request.to_owned(),
                message: err.to_string(),
            },
        }
    }

    /// Map the failure of one CSOM action; `status` is the HTTP status of the
    /// document response that carried it.
    #[must_use]
    pub fn from_csom(request: &str, status: u16, err: &CsomError) -> Self {
        match err {
            CsomError::Server { error, .. } => Self::Service(ServiceError {
                protocol: Protocol::Csom,
                status,
                code: Some(error.type_name.clone()).filter(|t| !t.is_empty()),
                message: error.message.clone(),
                request: request.to_owned(),
            }),
            CsomError::InvalidPath(_) | CsomError::UnsupportedParameter(_) => {
                Self::Client(ClientError::InvalidArgument(err.to_string()))
            }
            _ => Self::Protocol {
                protocol: Protocol::Csom,
                request: request.to_owned(),
                message: err.to_string(),
            },
        }
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(e) => Some(e.status),
            _ => None,
        }
    }

    #[must_use]
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<figment::Error> for SiteError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

// REST verbose:  {"error": {"code": "...", "message": {"lang": "en-US", "value": "..."}}}
// REST minimal:  {"odata.error": {"code": "...", "message": {"value": "..."}}}
// Graph:         {"error": {"code": "...", "message": "..."}}
fn parse_error_body(body: &[u8]) -> (Option<String>, String) {
    let fallback = || String::from_utf8_lossy(body).trim().to_owned();
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return (None, fallback());
    };
    let Some(error) = value.get("error").or_else(|| value.get("odata.error")) else {
        return (None, fallback());
    };
    let code = error
        .get("code")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let message = match error.get("message") {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(message) => message
            .get("value")
            .and_then(serde_json::Value::as_str)
            .map_or_else(fallback, str::to_owned),
        None => fallback(),
    };
    (code, message)
}
