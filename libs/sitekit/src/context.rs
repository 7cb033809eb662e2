//! Session context: one site, one open batch at a time.

use crate::batch::{BatchId, BatchRegistry};
use crate::config::SiteKitConfig;
use crate::dispatch::{BatchTransport, HttpDispatcher};
use crate::entity::EntitySink;
use crate::error::SiteError;
use crate::orchestrator::{BatchReport, ExecuteMode, Orchestrator};
use crate::request::ProtocolRequest;
use crate::slot::ResponseSlot;
use parking_lot::Mutex;
use sitekit_http::CredentialProvider;
use sitekit_odata::{EntityMetadata, EntityModel, FieldMapping, LoadSpecification, QueryTranslator, TokenValues};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point for callers: translate loads, queue requests, execute batches.
///
/// The registry lock is only held while queueing or taking a batch, never
/// across a network call, so requests can be queued while another batch runs.
pub struct SiteContext {
    config: Arc<SiteKitConfig>,
    translator: QueryTranslator,
    orchestrator: Orchestrator,
    registry: Mutex<BatchRegistry>,
}

impl std::fmt::Debug for SiteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteContext")
            .field("site_url", &self.config.site_url)
            .field("open_batch", &self.registry.lock().open_batch())
            .finish_non_exhaustive()
    }
}

impl SiteContext {
    /// Context over `transport` with URL tokens for the translator.
    #[must_use]
    pub fn new(config: SiteKitConfig, transport: Arc<dyn BatchTransport>, tokens: TokenValues) -> Self {
        let config = Arc::new(config);
        let translator = QueryTranslator::new(config.translator_options().with_tokens(tokens));
        Self {
            orchestrator: Orchestrator::new(transport, Arc::clone(&config)),
            translator,
            config,
            registry: Mutex::new(BatchRegistry::new()),
        }
    }

    /// Context over the resilient HTTP transports built from `config`.
    ///
    /// # Errors
    /// [`SiteError::Config`] for an invalid configuration or transport.
    pub fn connect(
        config: SiteKitConfig,
        credential: Arc<dyn CredentialProvider>,
        tokens: TokenValues,
    ) -> Result<Self, SiteError> {
        config.validate()?;
        let dispatcher = HttpDispatcher::from_config(&config, Some(credential))?;
        Ok(Self::new(config, Arc::new(dispatcher), tokens))
    }

    #[must_use]
    pub fn config(&self) -> &SiteKitConfig {
        &self.config
    }

    #[must_use]
    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }

    /// Id of the open batch, opening one if there is none.
    pub fn ensure_batch(&self) -> BatchId {
        self.registry.lock().ensure()
    }

    /// Queue `request` in batch `batch`.
    ///
    /// # Errors
    /// [`SiteError::Client`] if `batch` has already been executed.
    pub fn add(&self, batch: BatchId, request: ProtocolRequest) -> Result<ResponseSlot, SiteError> {
        self.registry.lock().add(batch, request)
    }

    /// Queue `request` in the open batch.
    pub fn enqueue(&self, request: ProtocolRequest) -> ResponseSlot {
        self.registry.lock().enqueue(request)
    }

    /// Translate `spec` for `E` and queue the resulting requests: the main
    /// request first, then one per own-query property.
    ///
    /// # Errors
    /// [`SiteError::Client`] when the shape cannot be translated.
    pub fn load<E: EntityModel>(&self, spec: &LoadSpecification) -> Result<Vec<ResponseSlot>, SiteError> {
        self.load_into(E::metadata(), spec, None)
    }

    /// Like [`SiteContext::load`] for a metadata table, delivering the main
    /// request's payload to `sink`.
    ///
    /// Sinks see logical property names whichever protocol ends up serving
    /// the request.
    ///
    /// # Errors
    /// [`SiteError::Client`] when the shape cannot be translated.
    pub fn load_into(
        &self,
        metadata: &'static EntityMetadata,
        spec: &LoadSpecification,
        mut sink: Option<Arc<dyn EntitySink>>,
    ) -> Result<Vec<ResponseSlot>, SiteError> {
        let requests = self.translator.translate(metadata, spec)?;

        let mut registry = self.registry.lock();
        let mut slots = Vec::with_capacity(requests.len());
        for request in requests {
            let entity = match request.property {
                None => Some(metadata),
                Some(property) => metadata.field(property).and_then(FieldMapping::target_metadata),
            };
            let is_main = request.property.is_none();
            let mut request = ProtocolRequest::from(request);
            request.entity = entity;
            if let Some(sink) = sink.take_if(|_| is_main) {
                request = request.with_sink(sink);
            }
            slots.push(registry.enqueue(request));
        }
        Ok(slots)
    }

    /// Execute batch `batch` without a cancellation signal.
    ///
    /// # Errors
    /// See [`SiteContext::execute_with_cancel`].
    pub async fn execute(&self, batch: BatchId, mode: ExecuteMode) -> Result<BatchReport, SiteError> {
        self.execute_with_cancel(batch, mode, &CancellationToken::new()).await
    }

    /// Execute the open batch, if any.
    ///
    /// # Errors
    /// See [`SiteContext::execute_with_cancel`].
    pub async fn flush(&self, mode: ExecuteMode) -> Result<BatchReport, SiteError> {
        let open = self.registry.lock().open_batch();
        match open {
            Some(batch) => self.execute(batch, mode).await,
            None => Ok(BatchReport::default()),
        }
    }

    /// Execute batch `batch`; it is closed first, so requests queued while it
    /// runs go into a new batch.
    ///
    /// # Errors
    /// [`SiteError::Client`] if `batch` is not open, [`SiteError::Canceled`]
    /// when `cancel` fires, and in [`ExecuteMode::Default`] the first request
    /// failure.
    pub async fn execute_with_cancel(
        &self,
        batch: BatchId,
        mode: ExecuteMode,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, SiteError> {
        let taken = self.registry.lock().take(batch);
        let Some(taken) = taken else {
            return Err(SiteError::Client(sitekit_odata::Error::InvalidArgument(format!(
                "{batch} is not open"
            ))));
        };
        self.orchestrator.execute(taken, mode, cancel).await
    }
}
