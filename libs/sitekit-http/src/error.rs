use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a request URL was rejected before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    ParseError,
    MissingAuthority,
    MissingScheme,
}

/// Failure of one transport call, after whatever retrying the chain does.
///
/// Non-2xx responses are not errors at this level unless every retry
/// attempt ended with a retriable status ([`HttpError::RetriesExhausted`]).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("cannot build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// One attempt ran past the per-attempt timeout
    #[error("attempt timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The whole call, retries included, ran past its deadline
    #[error("deadline of {} ms exceeded", .0.as_millis())]
    DeadlineExceeded(Duration),

    /// Connection, protocol or body read failure
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] BoxError),

    #[error("response body of {actual} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Every attempt ended with a retriable status; carries the last response
    #[error("HTTP {status} after {attempts} attempts: {body_preview}")]
    RetriesExhausted {
        status: http::StatusCode,
        /// Attempts made, the first one included
        attempts: usize,
        body_preview: String,
        retry_after: Option<Duration>,
    },

    /// The credential provider failed; never retried
    #[error("no token for '{audience}': {message}")]
    Authentication { audience: String, message: String },

    /// The buffered chain is gone (worker stopped or channel closed)
    #[error("transport closed")]
    ServiceClosed,

    #[error("invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Scheme not permitted by the transport security setting
    #[error("scheme '{scheme}' rejected: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// Status of the last response, for errors that carry one
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        if let HttpError::RetriesExhausted { status, .. } = self {
            Some(*status)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, HttpError::Authentication { .. })
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
