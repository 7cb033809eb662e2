use crate::config::{CapacityFloor, ThrottleConfig};
use crate::error::HttpError;
use http::header::HeaderName;
use http::{HeaderMap, Request, Response};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service};

/// Tower layer that pauses sends while the server reports low remaining capacity.
///
/// Only the most recent observation is kept: each response either schedules a
/// pause (remaining capacity below the floor) or clears the pending one.
/// All services produced by one layer share that observation, so one layer
/// instance must be used per protocol chain.
#[derive(Clone)]
pub struct ThrottleLayer {
    state: Arc<ThrottleState>,
}

struct ThrottleState {
    remaining_header: HeaderName,
    reset_header: HeaderName,
    limit_header: HeaderName,
    floor: CapacityFloor,
    max_delay: Duration,
    resume_at: Mutex<Option<Instant>>,
}

impl ThrottleLayer {
    /// Create a throttle from configuration.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` if a configured header name is invalid.
    pub fn try_new(config: &ThrottleConfig) -> Result<Self, HttpError> {
        Ok(Self {
            state: Arc::new(ThrottleState {
                remaining_header: HeaderName::from_bytes(config.remaining_header.as_bytes())?,
                reset_header: HeaderName::from_bytes(config.reset_header.as_bytes())?,
                limit_header: HeaderName::from_bytes(config.limit_header.as_bytes())?,
                floor: config.floor,
                max_delay: config.max_delay,
                resume_at: Mutex::new(None),
            }),
        })
    }

    /// Instant before which the next send will not be issued, if throttled
    #[must_use]
    pub fn resume_at(&self) -> Option<Instant> {
        *self.state.resume_at.lock()
    }
}

impl ThrottleState {
    fn pending_delay(&self) -> Option<Duration> {
        let mut resume_at = self.resume_at.lock();
        let until = (*resume_at)?;
        let now = Instant::now();
        if until <= now {
            *resume_at = None;
            return None;
        }
        Some(until - now)
    }

    fn observe(&self, headers: &HeaderMap) {
        let Some(remaining) = header_number(headers, &self.remaining_header) else {
            return;
        };

        if !self.below_floor(remaining, header_number(headers, &self.limit_header)) {
            *self.resume_at.lock() = None;
            return;
        }

        let reset = header_number(headers, &self.reset_header)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default()
            .min(self.max_delay);

        tracing::info!(
            remaining,
            reset_ms = reset.as_millis(),
            "remaining capacity below floor; pausing next send"
        );
        *self.resume_at.lock() = Some(Instant::now() + reset);
    }

    fn below_floor(&self, remaining: f64, limit: Option<f64>) -> bool {
        match self.floor {
            CapacityFloor::Absolute(floor) => remaining < f64::from(floor),
            CapacityFloor::PercentOfLimit(percent) => {
                let percent = f64::from(percent);
                match limit {
                    Some(limit) if limit > 0.0 => remaining * 100.0 < percent * limit,
                    _ => remaining < percent,
                }
            }
        }
    }
}

fn header_number(headers: &HeaderMap, name: &HeaderName) -> Option<f64> {
    let value = headers.get(name)?.to_str().ok()?.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Service that applies the shared throttle state around each call.
#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    state: Arc<ThrottleState>,
}

impl<S, B, ResBody> Service<Request<B>> for ThrottleService<S>
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

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            if let Some(delay) = state.pending_delay() {
                tracing::debug!(delay_ms = delay.as_millis(), "throttled send");
                tokio::time::sleep(delay).await;
            }
            let response = inner.call(req).await?;
            state.observe(response.headers());
            Ok(response)
        })
    }
}
