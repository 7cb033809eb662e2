#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Resilient HTTP transport for SiteKit protocols
//!
//! One [`HttpTransport`] is built per protocol (REST, Graph, CSOM). Each owns a
//! hyper client with rustls and a tower chain applying, outer to inner:
//! - retry with `Retry-After` or client-side backoff, tagging retried requests
//!   with a `Retry-Attempt` header
//! - rate-limit throttling driven by the last observed capacity headers
//! - bearer credentials per target audience
//! - a per-attempt timeout
//!
//! # Example
//!
//! ```ignore
//! use sitekit_http::{HttpTransport, StaticCredential};
//! use std::sync::Arc;
//!
//! let graph = HttpTransport::builder()
//!     .credential(Arc::new(StaticCredential::new(token)))
//!     .build()?;
//! let response = graph.send(request).await?;
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod layers;
pub mod response;
pub mod tls;
pub mod transport;

pub use builder::TransportBuilder;
pub use config::{
    Backoff, CapacityFloor, ExponentialBackoff, RetryConfig, RetryTrigger, ThrottleConfig,
    TlsRootConfig, TransportConfig, TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    CredentialError, CredentialProvider, RETRY_ATTEMPT_HEADER, StaticCredential, audience_of,
};
pub use response::{TransportResponse, parse_retry_after};
pub use transport::HttpTransport;
