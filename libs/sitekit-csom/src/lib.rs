#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Client object model (CSOM) codec
//!
//! Logical requests are object path chains ending in one operation. They are
//! folded into a single object graph, written as a `ProcessQuery` XML request,
//! and the flat JSON response is split back into one result per request.
//!
//! ```ignore
//! use sitekit_csom::{CsomRequest, decode, encode};
//!
//! let document = encode(&[
//!     CsomRequest::web().query(["Title"]),
//!     CsomRequest::web().property("Lists").query_items(["Title"]),
//! ])?;
//! let body = document.to_xml(sitekit_csom::DEFAULT_APPLICATION_NAME)?;
//! // POST body to {site}/_vti_bin/client.svc/ProcessQuery
//! let decoded = decode(&document, &response_bytes)?;
//! ```

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;
pub mod value;
pub mod xml;

pub use decoder::{DecodedResponse, ResponseHeader, decode};
pub use encoder::{Action, Document, DocumentBuilder, ObjectPath, encode};
pub use error::{CsomError, ServerError};
pub use model::{CsomRequest, Operation, PathBuilder, PathSpec, REQUEST_CONTEXT_TYPE_ID};
pub use value::ClientValue;
pub use xml::{CLIENT_QUERY_NAMESPACE, DEFAULT_APPLICATION_NAME};

/// Endpoint path of the CSOM service, relative to the site URL
pub const PROCESS_QUERY_PATH: &str = "_vti_bin/client.svc/ProcessQuery";
