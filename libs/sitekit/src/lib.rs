#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! SiteKit: declarative, batched access to a site over REST, Graph and CSOM
//!
//! Callers describe what to load with a [`LoadSpecification`]; the context
//! translates it for whichever protocol can serve it, queues the requests in
//! the open batch and, on execution, sends them in as few round trips as the
//! protocols allow.
//!
//! ```ignore
//! use sitekit::{ExecuteMode, SiteContext, SiteKitConfig};
//!
//! let config = SiteKitConfig::load(Some(Path::new("sitekit.yaml")))?;
//! let context = SiteContext::connect(config, credential, tokens)?;
//!
//! let slots = context.load::<Web>(&LoadSpecification::builder().select("Title").build())?;
//! context.flush(ExecuteMode::Default).await?;
//! let web = slots[0].wait().await?;
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod slot;

pub use batch::{Batch, BatchId, BatchRegistry, QueuedRequest};
pub use config::SiteKitConfig;
pub use context::SiteContext;
pub use dispatch::{BatchTransport, HttpDispatcher};
pub use entity::{EntityRecord, EntitySink, ExtraFields, FieldValue};
pub use error::{ClientError, ServiceError, SiteError};
pub use orchestrator::{BatchReport, ExecuteMode, Orchestrator, RequestFailure};
pub use request::{ProtocolRequest, RequestBody};
pub use response::{ResponseEnvelope, ResponseValue};
pub use slot::ResponseSlot;

pub use sitekit_csom::CsomRequest;
pub use sitekit_odata::{EntityMetadata, EntityModel, FieldMapping, LoadSpecification, Protocol, TokenValues};
pub use tokio_util::sync::CancellationToken;
