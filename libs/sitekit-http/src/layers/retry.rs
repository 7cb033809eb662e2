use crate::config::{Backoff, ExponentialBackoff, RetryConfig, RetryTrigger};
use crate::error::HttpError;
use crate::response::{ERROR_BODY_PREVIEW_LIMIT, ResponseBody, body_preview, parse_retry_after};
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Header carrying the retry attempt number (1-indexed) on retried requests.
pub const RETRY_ATTEMPT_HEADER: &str = "Retry-Attempt";

/// Tower layer that retries retriable statuses and transport failures.
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
    total_timeout: Option<Duration>,
}

impl RetryLayer {
    /// Create a new `RetryLayer` with the specified configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            total_timeout: None,
        }
    }

    /// Create a new `RetryLayer` with a deadline across all attempts
    #[must_use]
    pub fn with_total_timeout(config: RetryConfig, total_timeout: Option<Duration>) -> Self {
        Self {
            config,
            total_timeout,
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
            total_timeout: self.total_timeout,
        }
    }
}

/// Service that implements retry with backoff.
///
/// Responses with a status outside the retriable set pass through as
/// `Ok(Response)`. A retriable status that survives every attempt becomes
/// `Err(HttpError::RetriesExhausted)` carrying the final status.
///
/// The delay before each retry is the server's `Retry-After` when present,
/// otherwise the configured client-side backoff.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
    total_timeout: Option<Duration>,
}

/// What to do after one attempt.
enum Step {
    Done(Result<Response<ResponseBody>, HttpError>),
    Retry(Duration),
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let total_timeout = self.total_timeout;

        let (parts, body) = req.into_parts();
        let http_version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = std::sync::Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            let deadline_info = total_timeout.map(|t| (tokio::time::Instant::now() + t, t));

            let mut attempt = 0usize;
            loop {
                if let Some((deadline, timeout_duration)) = deadline_info
                    && tokio::time::Instant::now() >= deadline
                {
                    return Err(HttpError::DeadlineExceeded(timeout_duration));
                }

                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = http_version;
                *req.extensions_mut() = extensions.clone();
                if attempt > 0
                    && let Ok(value) = HeaderValue::try_from(attempt.to_string())
                {
                    req.headers_mut().insert(RETRY_ATTEMPT_HEADER, value);
                }

                let mut svc = inner.clone();
                svc.ready().await?;
                let result = svc.call(req).await;

                let backoff = match evaluate(&config, &method, attempt, result).await {
                    Step::Done(result) => return result,
                    Step::Retry(backoff) => backoff,
                };

                let effective_backoff = if let Some((deadline, timeout_duration)) = deadline_info {
                    let remaining =
                        deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        return Err(HttpError::DeadlineExceeded(timeout_duration));
                    }
                    backoff.min(remaining)
                } else {
                    backoff
                };

                tracing::debug!(
                    retry = attempt + 1,
                    max_retries = config.max_retries,
                    method = %method,
                    host = %host,
                    backoff_ms = effective_backoff.as_millis(),
                    "retrying request"
                );
                tokio::time::sleep(effective_backoff).await;
                attempt += 1;
            }
        })
    }
}

/// Decide whether an attempt's outcome is final or worth another try.
async fn evaluate(
    config: &RetryConfig,
    method: &http::Method,
    attempt: usize,
    result: Result<Response<ResponseBody>, HttpError>,
) -> Step {
    let exhausted = attempt >= config.max_retries;
    match result {
        Ok(resp) => {
            let status = resp.status();
            let trigger = RetryTrigger::Status(status.as_u16());
            if !config.should_retry(trigger, method) {
                return Step::Done(Ok(resp));
            }

            let retry_after = parse_retry_after(resp.headers());
            let prefix = match drain_response_body(resp, config.retry_response_drain_limit).await {
                Ok(prefix) => prefix,
                Err(e) => {
                    tracing::debug!(error = %e, "failed to drain response body before retry");
                    Bytes::new()
                }
            };

            if exhausted {
                return Step::Done(Err(HttpError::RetriesExhausted {
                    status,
                    attempts: attempt + 1,
                    body_preview: body_preview(&prefix),
                    retry_after,
                }));
            }

            let backoff = match retry_after {
                Some(delay) if !config.ignore_retry_after => delay,
                _ => calculate_backoff(&config.backoff, attempt),
            };
            tracing::debug!(
                status = status.as_u16(),
                retry_after_used = retry_after.is_some() && !config.ignore_retry_after,
                "retriable status"
            );
            Step::Retry(backoff)
        }
        Err(err) => {
            let trigger = get_retry_trigger(&err);
            if exhausted || !config.should_retry(trigger, method) {
                return Step::Done(Err(err));
            }
            tracing::debug!(error = %err, trigger = ?trigger, "retriable transport failure");
            Step::Retry(calculate_backoff(&config.backoff, attempt))
        }
    }
}

/// Drain response body up to `limit` bytes so the connection can be reused,
/// keeping the first bytes for error previews.
async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let (_parts, body) = response.into_parts();
    let mut body = std::pin::pin!(body);
    let mut drained = 0usize;
    let mut prefix = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let keep = ERROR_BODY_PREVIEW_LIMIT.saturating_sub(prefix.len()).min(chunk.len());
            prefix.extend_from_slice(&chunk[..keep]);
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(Bytes::from(prefix))
}

fn get_retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Calculate the client-side delay for a given attempt (0-indexed).
///
/// Safely handles NaN, infinity and negative values.
#[must_use]
pub fn calculate_backoff(backoff: &Backoff, attempt: usize) -> Duration {
    match backoff {
        Backoff::Exponential(exp) => exponential_backoff(exp, attempt),
        Backoff::Incremental { step, max } => {
            let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
            step.checked_mul(factor).unwrap_or(*max).min(*max)
        }
    }
}

fn exponential_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    // One day; anything longer is not a retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = initial_secs * multiplier.powi(attempt_i32);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let jitter_factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn make_response_body(data: &[u8]) -> ResponseBody {
        Full::new(Bytes::from(data.to_vec()))
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
            .boxed()
    }

    /// Replays scripted responses and records the retry header of every call.
    #[derive(Clone)]
    struct ScriptedService {
        script: Arc<Mutex<VecDeque<(u16, Option<&'static str>)>>>,
        seen_attempts: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl ScriptedService {
        fn new(script: &[(u16, Option<&'static str>)]) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                seen_attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            self.seen_attempts.lock().unwrap().len()
        }
    }

    impl Service<Request<Full<Bytes>>> for ScriptedService {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let attempt = req
                .headers()
                .get(RETRY_ATTEMPT_HEADER)
                .map(|v| v.to_str().unwrap().to_owned());
            self.seen_attempts.lock().unwrap().push(attempt);
            let (status, retry_after) = self.script.lock().unwrap().pop_front().unwrap();
            Box::pin(async move {
                let mut builder = Response::builder().status(status);
                if let Some(value) = retry_after {
                    builder = builder.header(http::header::RETRY_AFTER, value);
                }
                Ok(builder.body(make_response_body(b"busy")).unwrap())
            })
        }
    }

    fn fast_config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: Backoff::Exponential(ExponentialBackoff::fast()),
            ..RetryConfig::default()
        }
    }

    fn post() -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("https://contoso.sharepoint.com/_api/$batch")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_retry_then_success() {
        let service = ScriptedService::new(&[(429, None), (200, None)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(post()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.calls(), 2);
        let seen = service.seen_attempts.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("1".to_owned())]);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_status() {
        let service = ScriptedService::new(&[(503, None), (503, None), (504, None)]);
        let mut retry = RetryLayer::new(fast_config(2)).layer(service.clone());

        let err = retry.call(post()).await.unwrap_err();

        match err {
            HttpError::RetriesExhausted {
                status,
                attempts,
                body_preview,
                ..
            } => {
                assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
                assert_eq!(attempts, 3);
                assert_eq!(body_preview, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_status_passes_through() {
        let service = ScriptedService::new(&[(500, None)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(post()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_takes_precedence_over_backoff() {
        let service = ScriptedService::new(&[(429, Some("3")), (200, None)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let started = tokio::time::Instant::now();
        let resp = retry.call(post()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transport_error_not_retried_for_post() {
        #[derive(Clone)]
        struct FailingService {
            calls: Arc<Mutex<usize>>,
        }

        impl Service<Request<Full<Bytes>>> for FailingService {
            type Response = Response<ResponseBody>;
            type Error = HttpError;
            type Future =
                Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

            fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _req: Request<Full<Bytes>>) -> Self::Future {
                *self.calls.lock().unwrap() += 1;
                Box::pin(async { Err(HttpError::Transport("connection reset".into())) })
            }
        }

        let calls = Arc::new(Mutex::new(0));
        let mut retry = RetryLayer::new(fast_config(3)).layer(FailingService {
            calls: calls.clone(),
        });

        let err = retry.call(post()).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
        assert_eq!(*calls.lock().unwrap(), 1);

        let get = Request::builder()
            .method(Method::GET)
            .uri("https://graph.microsoft.com/v1.0/sites")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let _ = retry.call(get).await;
        assert_eq!(*calls.lock().unwrap(), 5);
    }

    #[test]
    fn test_incremental_backoff_grows_linearly() {
        let backoff = Backoff::Incremental {
            step: Duration::from_secs(2),
            max: Duration::from_secs(5),
        };
        assert_eq!(calculate_backoff(&backoff, 0), Duration::from_secs(2));
        assert_eq!(calculate_backoff(&backoff, 1), Duration::from_secs(4));
        assert_eq!(calculate_backoff(&backoff, 2), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_sanitizes_multiplier() {
        let backoff = Backoff::Exponential(ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: f64::NAN,
            jitter: false,
        });
        assert_eq!(calculate_backoff(&backoff, 5), Duration::from_millis(100));

        let backoff = Backoff::Exponential(ExponentialBackoff {
            multiplier: 10.0,
            jitter: false,
            ..ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1))
        });
        assert_eq!(calculate_backoff(&backoff, 4), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_jitter_stays_within_max() {
        let backoff = Backoff::Exponential(ExponentialBackoff::new(
            Duration::from_millis(800),
            Duration::from_secs(1),
        ));
        for attempt in 0..5 {
            assert!(calculate_backoff(&backoff, attempt) <= Duration::from_secs(1));
        }
    }
}
