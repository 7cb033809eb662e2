use crate::builder::TransportBuilder;
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{ResponseBody, TransportResponse, read_body_limited};
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use tower::buffer::Buffer;
use tower::{Service, ServiceExt};

/// Future type of the boxed layer chain
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Buffered layer chain shared by all clones of a transport
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// One protocol's resilient transport.
///
/// `Clone + Send + Sync`; clones share the buffer worker, the connection pool
/// and the throttle state.
#[derive(Clone)]
pub struct HttpTransport {
    service: BufferedService,
    max_body_size: usize,
    transport_security: TransportSecurity,
}

impl HttpTransport {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            transport_security,
        }
    }

    /// Create a builder for configuring a transport
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Send one request through the chain and read the whole response.
    ///
    /// Any status is returned as `Ok` unless it was retriable and every
    /// attempt failed, which yields `HttpError::RetriesExhausted`.
    ///
    /// # Errors
    /// Returns an error for invalid URLs, transport failures, timeouts,
    /// credential failures, exhausted retries and oversized bodies.
    pub async fn send(&self, request: Request<Bytes>) -> Result<TransportResponse, HttpError> {
        let (parts, body) = request.into_parts();
        validate_uri(&parts.uri, self.transport_security)?;
        let request = Request::from_parts(parts, Full::new(body));

        let mut service = self.service.clone();
        let response = service
            .ready()
            .await
            .map_err(map_buffer_error)?
            .call(request)
            .await
            .map_err(map_buffer_error)?;

        let (parts, body) = response.into_parts();
        let body = read_body_limited(body, self.max_body_size).await?;
        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

/// Recover the chain's `HttpError` from the buffer's boxed error.
#[must_use]
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(error = %err, "buffer worker closed unexpectedly");
            HttpError::ServiceClosed
        }
    }
}

fn validate_uri(uri: &Uri, security: TransportSecurity) -> Result<(), HttpError> {
    let invalid = |kind, reason: &str| HttpError::InvalidUri {
        url: uri.to_string(),
        kind,
        reason: reason.to_owned(),
    };

    let scheme = uri
        .scheme_str()
        .ok_or_else(|| invalid(InvalidUriKind::MissingScheme, "URL needs a scheme"))?;
    if uri.authority().is_none() {
        return Err(invalid(InvalidUriKind::MissingAuthority, "URL needs a host"));
    }

    match (scheme, security) {
        ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => Ok(()),
        ("http", _) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "plain HTTP requires TransportSecurity::AllowInsecureHttp".to_owned(),
        }),
        _ => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http and https are supported".to_owned(),
        }),
    }
}
