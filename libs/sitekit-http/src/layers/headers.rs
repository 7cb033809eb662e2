use crate::error::HttpError;
use http::header::{HeaderName, USER_AGENT};
use http::{HeaderMap, HeaderValue, Request};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Adds headers the caller did not set: the client's `User-Agent` and any
/// other per-transport defaults. Headers already on a request win.
#[derive(Clone, Debug, Default)]
pub struct DefaultHeadersLayer {
    headers: Arc<HeaderMap>,
}

impl DefaultHeadersLayer {
    /// Defaults with only a `User-Agent`.
    ///
    /// # Errors
    /// `HttpError::InvalidHeaderValue` when `user_agent` is not a valid header value.
    pub fn user_agent(user_agent: &str) -> Result<Self, HttpError> {
        Self::default().with(USER_AGENT, user_agent)
    }

    /// Add one more default header.
    ///
    /// # Errors
    /// `HttpError::InvalidHeaderValue` when `value` is not a valid header value.
    pub fn with(mut self, name: HeaderName, value: &str) -> Result<Self, HttpError> {
        let value = HeaderValue::from_str(value)?;
        Arc::make_mut(&mut self.headers).insert(name, value);
        Ok(self)
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeaders {
            inner,
            headers: Arc::clone(&self.headers),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DefaultHeaders<S> {
    inner: S,
    headers: Arc<HeaderMap>,
}

impl<S, B> Service<Request<B>> for DefaultHeaders<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let headers = request.headers_mut();
        for (name, value) in &*self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        self.inner.call(request)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::header::ACCEPT;
    use std::convert::Infallible;
    use std::future::{Ready, ready};
    use tower::ServiceExt;

    /// Returns the headers the request arrived with.
    #[derive(Clone)]
    struct Headers;

    impl Service<Request<()>> for Headers {
        type Response = HeaderMap;
        type Error = Infallible;
        type Future = Ready<Result<HeaderMap, Infallible>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: Request<()>) -> Self::Future {
            ready(Ok(request.headers().clone()))
        }
    }

    #[tokio::test]
    async fn test_missing_headers_are_added() {
        let layer = DefaultHeadersLayer::user_agent("sitekit/test")
            .unwrap()
            .with(ACCEPT, "application/json")
            .unwrap();

        let headers = layer.layer(Headers).oneshot(Request::new(())).await.unwrap();

        assert_eq!(headers[USER_AGENT], "sitekit/test");
        assert_eq!(headers[ACCEPT], "application/json");
    }

    #[tokio::test]
    async fn test_request_headers_win() {
        let service = DefaultHeadersLayer::user_agent("sitekit/test").unwrap().layer(Headers);
        let request = Request::builder()
            .header(USER_AGENT, "custom/1.0")
            .body(())
            .unwrap();

        let headers = service.oneshot(request).await.unwrap();

        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(headers[USER_AGENT], "custom/1.0");
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        assert!(matches!(
            DefaultHeadersLayer::user_agent("bad\nagent"),
            Err(HttpError::InvalidHeaderValue(_))
        ));
    }
}
