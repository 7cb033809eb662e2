//! Awaitable result of one queued request.

use crate::error::SiteError;
use crate::response::ResponseEnvelope;
use std::sync::Arc;
use tokio::sync::watch;

pub type SlotResult = Result<Arc<ResponseEnvelope>, SiteError>;

/// Handle to the eventual response of a queued request.
///
/// Clones observe the same resolution. A slot resolves at most once; later
/// resolutions are ignored.
#[derive(Clone)]
pub struct ResponseSlot {
    inner: Arc<SlotInner>,
}

struct SlotInner {
    request: String,
    state: watch::Sender<Option<SlotResult>>,
}

impl std::fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("request", &self.inner.request)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl ResponseSlot {
    pub(crate) fn new(request: String) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(SlotInner { request, state }),
        }
    }

    /// Whether both handles refer to the same slot
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// `METHOD url` of the request this slot answers
    #[must_use]
    pub fn request(&self) -> &str {
        &self.inner.request
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.state.borrow().is_some()
    }

    /// Result if already resolved
    #[must_use]
    pub fn try_result(&self) -> Option<SlotResult> {
        self.inner.state.borrow().clone()
    }

    /// Wait for the batch holding this request to execute.
    ///
    /// # Errors
    /// The error the request was faulted with.
    pub async fn wait(&self) -> SlotResult {
        let mut rx = self.inner.state.subscribe();
        let resolved = rx.wait_for(Option::is_some).await;
        match resolved {
            Ok(state) => state.clone().unwrap_or_else(|| Err(self.canceled())),
            // The sender lives in `inner`, which this handle keeps alive.
            Err(_) => Err(self.canceled()),
        }
    }

    /// Resolve unless already resolved; returns whether this call won.
    pub(crate) fn resolve(&self, result: SlotResult) -> bool {
        let mut result = Some(result);
        self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = result.take();
            true
        })
    }

    pub(crate) fn cancel(&self) -> bool {
        self.resolve(Err(self.canceled()))
    }

    fn canceled(&self) -> SiteError {
        SiteError::Canceled {
            request: self.inner.request.clone(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::ResponseValue;
    use bytes::Bytes;

    fn ok(status: u16) -> SlotResult {
        Ok(Arc::new(ResponseEnvelope {
            protocol: sitekit_odata::Protocol::Rest,
            status,
            body: Bytes::new(),
            value: ResponseValue::Empty,
        }))
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let slot = ResponseSlot::new("GET web".to_owned());
        let waiter = slot.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        assert!(slot.resolve(ok(200)));
        assert!(!slot.resolve(ok(500)));
        assert!(!slot.cancel());

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(slot.try_result().unwrap().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_cancel_names_the_request() {
        let slot = ResponseSlot::new("GET web/lists".to_owned());
        assert!(slot.try_result().is_none());
        slot.cancel();
        assert_eq!(
            slot.wait().await.unwrap_err(),
            SiteError::Canceled {
                request: "GET web/lists".to_owned()
            }
        );
    }

    #[test]
    fn test_ptr_eq_follows_clones() {
        let a = ResponseSlot::new("GET web".to_owned());
        let b = ResponseSlot::new("GET web".to_owned());
        assert!(ResponseSlot::ptr_eq(&a, &a.clone()));
        assert!(!ResponseSlot::ptr_eq(&a, &b));
    }
}
