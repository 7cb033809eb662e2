use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, Response, Uri};
use secrecy::{ExposeSecret, SecretString};
use tower::{Layer, Service};

use crate::error::HttpError;

/// Failure reported by a [`CredentialProvider`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CredentialError(pub String);

/// Supplies a bearer token for a target audience.
///
/// The audience is the scheme and authority of the request URL, e.g.
/// `https://contoso.sharepoint.com` or `https://graph.microsoft.com`.
/// Implementations own caching and refresh; the layer asks on every attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self, audience: &str) -> Result<SecretString, CredentialError>;
}

/// Provider returning the same token for every audience.
pub struct StaticCredential {
    token: SecretString,
}

impl StaticCredential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn token(&self, _audience: &str) -> Result<SecretString, CredentialError> {
        Ok(self.token.clone())
    }
}

/// Audience of a request: `scheme://authority`.
#[must_use]
pub fn audience_of(uri: &Uri) -> String {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
        (None, Some(authority)) => authority.to_string(),
        _ => String::new(),
    }
}

/// Tower layer that injects `Authorization: Bearer <token>` from a provider.
#[derive(Clone)]
pub struct CredentialLayer {
    provider: Arc<dyn CredentialProvider>,
}

impl CredentialLayer {
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

impl<S> Layer<S> for CredentialLayer {
    type Service = CredentialService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CredentialService {
            inner,
            provider: Arc::clone(&self.provider),
        }
    }
}

/// Created by [`CredentialLayer`].
#[derive(Clone)]
pub struct CredentialService<S> {
    inner: S,
    provider: Arc<dyn CredentialProvider>,
}

impl<S, B, ResBody> Service<Request<B>> for CredentialService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let provider = Arc::clone(&self.provider);

        Box::pin(async move {
            let audience = audience_of(req.uri());
            let secret = provider
                .token(&audience)
                .await
                .map_err(|e| HttpError::Authentication {
                    audience: audience.clone(),
                    message: e.0,
                })?;

            let raw = zeroize::Zeroizing::new(format!("Bearer {}", secret.expose_secret()));
            let mut value = HeaderValue::from_str(&raw)?;
            value.set_sensitive(true);
            req.headers_mut().insert(AUTHORIZATION, value);

            inner.call(req).await
        })
    }
}
