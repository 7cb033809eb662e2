use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for outgoing protocol calls
pub const DEFAULT_USER_AGENT: &str = concat!("sitekit/", env!("CARGO_PKG_VERSION"));

/// Default remaining-capacity header reported by the REST and Graph services
pub const DEFAULT_REMAINING_HEADER: &str = "RateLimit-Remaining";

/// Default reset-interval header (seconds until capacity is restored)
pub const DEFAULT_RESET_HEADER: &str = "RateLimit-Reset";

/// Default header carrying the total capacity of the current window
pub const DEFAULT_LIMIT_HEADER: &str = "RateLimit-Limit";

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Transport-level errors (connection refused, DNS failure, reset, etc.)
    TransportError,
    /// Request attempt timed out
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Error that is never retryable (authentication, deadline, closed service)
    NonRetryable,
}

impl RetryTrigger {
    /// HTTP 429 Too Many Requests
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    /// HTTP 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);
    /// HTTP 504 Gateway Timeout
    pub const GATEWAY_TIMEOUT: Self = Self::Status(504);
}

/// Check if HTTP method is idempotent (safe to retry after a transport failure).
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::PUT
            | http::Method::DELETE
            | http::Method::OPTIONS
            | http::Method::TRACE
    )
}

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial backoff duration (default: 500ms)
    pub initial: Duration,

    /// Maximum backoff duration (default: 30s)
    pub max: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Adds a random 0-25% to each delay when enabled (default: true)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom initial and max durations
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Client-side delay used when the server does not send `Retry-After`.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// `initial * multiplier^attempt`, capped at `max`
    Exponential(ExponentialBackoff),
    /// `step * (attempt + 1)`, capped at `max`
    Incremental { step: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

/// Retry policy for one protocol chain.
///
/// Triggers in `always_retry` are retried for every method: the server has
/// rejected the request before doing any work, so resending a batch POST is safe.
/// Triggers in `idempotent_retry` only apply to idempotent methods, since a
/// transport failure may hide a request that was already executed.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 = no retries, default: 5)
    pub max_retries: usize,

    /// Delay strategy used when the response carries no `Retry-After`
    pub backoff: Backoff,

    /// Default: 429, 503, 504
    pub always_retry: HashSet<RetryTrigger>,

    /// Default: transport errors and attempt timeouts
    pub idempotent_retry: HashSet<RetryTrigger>,

    /// Ignore the server's `Retry-After` and always use `backoff`
    pub ignore_retry_after: bool,

    /// Maximum bytes drained from a retried response so the connection can be reused
    pub retry_response_drain_limit: usize,
}

/// Default drain limit for response bodies before retry (64 KiB)
pub const DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Backoff::default(),
            always_retry: HashSet::from([
                RetryTrigger::TOO_MANY_REQUESTS,
                RetryTrigger::SERVICE_UNAVAILABLE,
                RetryTrigger::GATEWAY_TIMEOUT,
            ]),
            idempotent_retry: HashSet::from([RetryTrigger::TransportError, RetryTrigger::Timeout]),
            ignore_retry_after: false,
            retry_response_drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }
}

impl RetryConfig {
    /// Create config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Replace the set of retriable HTTP statuses
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.always_retry = statuses.into_iter().map(RetryTrigger::Status).collect();
        self
    }

    /// Whether `status` is retried by this policy
    #[must_use]
    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.always_retry.contains(&RetryTrigger::Status(status))
    }

    /// Check if the given trigger should cause a retry for the given HTTP method
    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger, method: &http::Method) -> bool {
        if self.always_retry.contains(&trigger) {
            return true;
        }
        self.idempotent_retry.contains(&trigger) && is_idempotent_method(method)
    }
}

/// Threshold below which the throttle pauses the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityFloor {
    /// Pause when the remaining-capacity header is below this value
    Absolute(u32),
    /// Pause when remaining capacity drops below this percentage of the limit header.
    /// When the limit header is missing the remaining value is read as a percentage.
    PercentOfLimit(u8),
}

/// Rate-limit throttling configuration for one protocol chain
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Header with the remaining capacity of the current window
    pub remaining_header: String,
    /// Header with the number of seconds until the window resets
    pub reset_header: String,
    /// Header with the total capacity of the window (used by `PercentOfLimit`)
    pub limit_header: String,
    /// Floor that engages the throttle
    pub floor: CapacityFloor,
    /// Upper bound on a single throttle pause
    pub max_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            remaining_header: DEFAULT_REMAINING_HEADER.to_owned(),
            reset_header: DEFAULT_RESET_HEADER.to_owned(),
            limit_header: DEFAULT_LIMIT_HEADER.to_owned(),
            floor: CapacityFloor::PercentOfLimit(10),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only)
    #[default]
    TlsOnly,
    /// Allow plain HTTP. Only for local mock servers.
    AllowInsecureHttp,
}

/// Configuration of one protocol's transport chain
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt timeout (default: 100 seconds, batches can be slow)
    pub request_timeout: Duration,

    /// Deadline across all attempts and backoff delays (default: none)
    pub total_timeout: Option<Duration>,

    /// User-Agent header value
    pub user_agent: String,

    /// Retry policy (`None` disables retries)
    pub retry: Option<RetryConfig>,

    /// Rate-limit throttling (`None` disables throttling)
    pub throttle: Option<ThrottleConfig>,

    /// Maximum response body size in bytes (default: 50 MiB)
    pub max_body_size: usize,

    /// TLS root certificate source
    pub tls_roots: TlsRootConfig,

    /// Transport security mode
    pub transport: TransportSecurity,

    /// Buffer capacity for concurrent callers (default: 256)
    pub buffer_capacity: usize,

    /// Idle timeout for pooled connections (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections per host (default: 8)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(100),
            total_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryConfig::default()),
            throttle: Some(ThrottleConfig::default()),
            max_body_size: 50 * 1024 * 1024,
            tls_roots: TlsRootConfig::default(),
            transport: TransportSecurity::default(),
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 8,
        }
    }
}

impl TransportConfig {
    /// Configuration for tests against local mock servers: plain HTTP, fast
    /// backoff, short timeout.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry: Some(RetryConfig {
                max_retries: 3,
                backoff: Backoff::Exponential(ExponentialBackoff::fast()),
                ..RetryConfig::default()
            }),
            transport: TransportSecurity::AllowInsecureHttp,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_default_retry_statuses() {
        let config = RetryConfig::default();
        assert!(config.is_retriable_status(429));
        assert!(config.is_retriable_status(503));
        assert!(config.is_retriable_status(504));
        assert!(!config.is_retriable_status(500));
        assert!(!config.is_retriable_status(404));
    }

    #[test]
    fn test_status_retry_applies_to_post() {
        let config = RetryConfig::default();
        assert!(config.should_retry(RetryTrigger::TOO_MANY_REQUESTS, &Method::POST));
        assert!(config.should_retry(RetryTrigger::GATEWAY_TIMEOUT, &Method::GET));
    }

    #[test]
    fn test_transport_retry_only_for_idempotent_methods() {
        let config = RetryConfig::default();
        assert!(config.should_retry(RetryTrigger::TransportError, &Method::GET));
        assert!(config.should_retry(RetryTrigger::Timeout, &Method::DELETE));
        assert!(!config.should_retry(RetryTrigger::TransportError, &Method::POST));
        assert!(!config.should_retry(RetryTrigger::Timeout, &Method::PATCH));
        assert!(!config.should_retry(RetryTrigger::NonRetryable, &Method::GET));
    }

    #[test]
    fn test_with_statuses_replaces_set() {
        let config = RetryConfig::default().with_statuses([500]);
        assert!(config.is_retriable_status(500));
        assert!(!config.is_retriable_status(429));
    }

    #[test]
    fn test_for_testing_allows_http() {
        let config = TransportConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.retry.map(|r| r.max_retries), Some(3));
    }
}
