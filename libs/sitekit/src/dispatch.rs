//! The seam between the orchestrator and the network.

use crate::config::SiteKitConfig;
use crate::error::SiteError;
use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use sitekit_http::{CredentialProvider, HttpError, HttpTransport, TransportBuilder, TransportResponse};
use sitekit_odata::Protocol;
use std::sync::Arc;

/// Sends one HTTP call over the chain of `protocol`.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send(&self, protocol: Protocol, request: Request<Bytes>) -> Result<TransportResponse, HttpError>;
}

/// One resilient transport per protocol, so retries and throttling of one
/// API never hold back another.
#[derive(Clone)]
pub struct HttpDispatcher {
    rest: HttpTransport,
    graph: HttpTransport,
    csom: HttpTransport,
}

impl HttpDispatcher {
    /// Build the three transports from `config`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// [`SiteError::Config`] if a transport cannot be built.
    pub fn from_config(
        config: &SiteKitConfig,
        credential: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self, SiteError> {
        let build = |protocol: Protocol| {
            let mut builder = TransportBuilder::with_config(config.protocol(protocol).transport_config());
            if let Some(credential) = &credential {
                builder = builder.credential(Arc::clone(credential));
            }
            builder
                .build()
                .map_err(|e| SiteError::Config(format!("{protocol} transport: {e}")))
        };
        Ok(Self {
            rest: build(Protocol::Rest)?,
            graph: build(Protocol::Graph)?,
            csom: build(Protocol::Csom)?,
        })
    }

    fn transport(&self, protocol: Protocol) -> &HttpTransport {
        match protocol {
            Protocol::Rest => &self.rest,
            Protocol::Graph => &self.graph,
            Protocol::Csom => &self.csom,
        }
    }
}

#[async_trait]
impl BatchTransport for HttpDispatcher {
    async fn send(&self, protocol: Protocol, request: Request<Bytes>) -> Result<TransportResponse, HttpError> {
        self.transport(protocol).send(request).await
    }
}
