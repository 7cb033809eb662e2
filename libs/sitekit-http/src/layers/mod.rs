//! Tower layers composing a protocol chain.
//!
//! Outer to inner: retry, throttle, credential, then default headers and the
//! timeout-wrapped hyper client. Retry sits outside the throttle so every
//! attempt honours the latest rate-limit observation, and outside the
//! credential layer so each attempt asks the provider for a fresh token.

mod credential;
mod headers;
mod retry;
mod throttle;

pub use credential::{
    CredentialError, CredentialLayer, CredentialProvider, CredentialService, StaticCredential,
    audience_of,
};
pub use headers::{DefaultHeaders, DefaultHeadersLayer};
pub use retry::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService, calculate_backoff};
pub use throttle::{ThrottleLayer, ThrottleService};
