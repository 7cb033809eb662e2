//! Open batches and request de-duplication.

use crate::error::{ClientError, SiteError};
use crate::request::ProtocolRequest;
use crate::slot::ResponseSlot;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// A request waiting in a batch together with the slot its callers hold.
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: ProtocolRequest,
    pub slot: ResponseSlot,
}

/// Requests collected until the next execution.
///
/// Dropping a batch cancels every slot it has not resolved.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    queued: Vec<QueuedRequest>,
}

impl Batch {
    fn new(id: BatchId) -> Self {
        Self {
            id,
            queued: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> BatchId {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    #[must_use]
    pub fn queued(&self) -> &[QueuedRequest] {
        &self.queued
    }

    /// Queue `request`, or join an equal request already queued. Sinks of a
    /// duplicate are added to the queued request; a missing backup or entity
    /// type is adopted.
    pub fn enqueue(&mut self, request: ProtocolRequest) -> ResponseSlot {
        if let Some(existing) = self.queued.iter_mut().find(|q| q.request.same_wire(&request)) {
            tracing::debug!(batch = %self.id, request = %existing.slot.request(), "joined queued request");
            let ProtocolRequest {
                sinks, backup, entity, ..
            } = request;
            existing.request.sinks.extend(sinks);
            if existing.request.backup.is_none() {
                existing.request.backup = backup;
            }
            if existing.request.entity.is_none() {
                existing.request.entity = entity;
            }
            return existing.slot.clone();
        }

        let slot = ResponseSlot::new(request.label());
        self.queued.push(QueuedRequest {
            request,
            slot: slot.clone(),
        });
        slot
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        let canceled = self.queued.iter().filter(|q| q.slot.cancel()).count();
        if canceled > 0 {
            tracing::debug!(batch = %self.id, canceled, "dropped batch with pending requests");
        }
    }
}

/// Holds at most one open batch per context.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    next_id: u64,
    open: Option<Batch>,
}

impl BatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the open batch, opening one if there is none.
    pub fn ensure(&mut self) -> BatchId {
        self.open_mut().id
    }

    /// Add `request` to batch `id`.
    ///
    /// # Errors
    /// [`ClientError::InvalidArgument`] if `id` is not the open batch, i.e. it
    /// has already been executed.
    pub fn add(&mut self, id: BatchId, request: ProtocolRequest) -> Result<ResponseSlot, SiteError> {
        match &mut self.open {
            Some(batch) if batch.id == id => Ok(batch.enqueue(request)),
            _ => Err(ClientError::InvalidArgument(format!("{id} is not open")).into()),
        }
    }

    /// Queue into the open batch, opening one if needed.
    pub fn enqueue(&mut self, request: ProtocolRequest) -> ResponseSlot {
        self.open_mut().enqueue(request)
    }

    /// Close batch `id` for execution; the next `ensure` opens a new one.
    pub fn take(&mut self, id: BatchId) -> Option<Batch> {
        if self.open.as_ref().is_some_and(|b| b.id == id) {
            self.open.take()
        } else {
            None
        }
    }

    #[must_use]
    pub fn open_batch(&self) -> Option<BatchId> {
        self.open.as_ref().map(Batch::id)
    }

    fn open_mut(&mut self) -> &mut Batch {
        let next_id = &mut self.next_id;
        self.open.get_or_insert_with(|| {
            *next_id += 1;
            let id = BatchId(*next_id);
            tracing::debug!(batch = %id, "opened batch");
            Batch::new(id)
        })
    }
}
