use crate::config::{RetryConfig, ThrottleConfig, TlsRootConfig, TransportConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{
    CredentialLayer, CredentialProvider, DefaultHeadersLayer, RetryLayer, ThrottleLayer,
};
use crate::response::ResponseBody;
use crate::tls;
use crate::transport::{BufferedService, HttpTransport};
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceBuilder, ServiceExt};

/// Type-erased service between layer composition steps in [`TransportBuilder::build`].
type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

/// Builder for one protocol's [`HttpTransport`].
///
/// Every protocol gets its own builder and therefore its own throttle state.
pub struct TransportBuilder {
    config: TransportConfig,
    credential: Option<Arc<dyn CredentialProvider>>,
}

impl TransportBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            credential: None,
        }
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the retry policy (`None` disables retries)
    #[must_use]
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the throttle policy (`None` disables throttling)
    #[must_use]
    pub fn throttle(mut self, throttle: Option<ThrottleConfig>) -> Self {
        self.config.throttle = throttle;
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Allow plain HTTP. Only for local mock servers.
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Attach a bearer-token provider; every attempt asks it for a token.
    #[must_use]
    pub fn credential(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credential = Some(provider);
        self
    }

    /// Build the transport.
    ///
    /// Must be called inside a tokio runtime: the buffer spawns its worker.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or a configured header is invalid.
    pub fn build(self) -> Result<HttpTransport, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let timeout = self.config.request_timeout;
        let https = build_https_connector(self.config.tls_roots, self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host);
        if let Some(idle_timeout) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DefaultHeadersLayer::user_agent(&self.config.user_agent)?)
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let mut service: InnerService = service.boxed_clone();

        // Inside retry: each attempt re-acquires the token.
        if let Some(provider) = self.credential {
            service = CredentialLayer::new(provider).layer(service).boxed_clone();
        }

        // Inside retry: each attempt waits out the latest throttle observation.
        if let Some(ref throttle) = self.config.throttle {
            service = ThrottleLayer::try_new(throttle)?
                .layer(service)
                .boxed_clone();
        }

        if let Some(ref retry) = self.config.retry {
            service = RetryLayer::with_total_timeout(retry.clone(), self.config.total_timeout)
                .layer(service)
                .boxed_clone();
        }

        let buffered: BufferedService = Buffer::new(service, self.config.buffer_capacity.max(1));

        Ok(HttpTransport::new(
            buffered,
            self.config.max_body_size,
            self.config.transport,
        ))
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map tower errors to `HttpError` with actual timeout duration
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

/// Build the HTTPS connector with the specified TLS root configuration.
///
/// # Errors
/// Returns `HttpError::Tls` if native roots are requested but unavailable.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls::native_roots_config()?)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_builder_build_default() {
        assert!(TransportBuilder::new().build().is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_insecure_http_warning_emitted() {
        TransportBuilder::new().allow_insecure_http().build().unwrap();
        assert!(logs_contain("insecure HTTP enabled"));
    }

    #[tokio::test]
    async fn test_invalid_user_agent_rejected() {
        let config = TransportConfig {
            user_agent: "bad\r\nagent".to_owned(),
            ..TransportConfig::default()
        };
        let result = TransportBuilder::with_config(config).build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[tokio::test]
    async fn test_invalid_throttle_header_rejected() {
        let throttle = ThrottleConfig {
            reset_header: "not a header".to_owned(),
            ..ThrottleConfig::default()
        };
        let result = TransportBuilder::new().throttle(Some(throttle)).build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[test]
    fn test_map_tower_error_timeout() {
        let err: tower::BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let mapped = map_tower_error(err, Duration::from_secs(3));
        assert!(matches!(mapped, HttpError::Timeout(d) if d == Duration::from_secs(3)));
    }

    #[test]
    fn test_map_tower_error_preserves_http_error() {
        let err: tower::BoxError = Box::new(HttpError::ServiceClosed);
        assert!(matches!(
            map_tower_error(err, Duration::from_secs(1)),
            HttpError::ServiceClosed
        ));
    }
}
