use crate::entity::EntitySink;
use http::Method;
use sitekit_csom::{CsomRequest, PathSpec};
use sitekit_odata::{EntityMetadata, ODataRequest, Protocol};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// One logical CSOM request; the batch folds all of them into one document
    Csom(CsomRequest),
}

/// One request as the orchestrator queues it.
#[derive(Clone)]
pub struct ProtocolRequest {
    pub protocol: Protocol,
    pub method: Method,
    /// Absolute URL; empty for CSOM, which always posts to the site's
    /// `ProcessQuery` endpoint
    pub url: String,
    pub body: RequestBody,
    /// REST equivalent of a Graph request
    pub backup: Option<Box<ProtocolRequest>>,
    pub sinks: Vec<Arc<dyn EntitySink>>,
    /// Entity type the payload describes; sinks then see logical names
    pub entity: Option<&'static EntityMetadata>,
}

impl fmt::Debug for ProtocolRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRequest")
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body)
            .field("backup", &self.backup)
            .field("sinks", &self.sinks.len())
            .field("entity", &self.entity.map(|e| e.type_name))
            .finish()
    }
}

impl ProtocolRequest {
    #[must_use]
    pub fn new(protocol: Protocol, method: Method, url: impl Into<String>) -> Self {
        Self {
            protocol,
            method,
            url: url.into(),
            body: RequestBody::Empty,
            backup: None,
            sinks: Vec::new(),
            entity: None,
        }
    }

    #[must_use]
    pub fn get(protocol: Protocol, url: impl Into<String>) -> Self {
        Self::new(protocol, Method::GET, url)
    }

    #[must_use]
    pub fn csom(request: CsomRequest) -> Self {
        Self {
            body: RequestBody::Csom(request),
            ..Self::new(Protocol::Csom, Method::POST, String::new())
        }
    }

    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn with_backup(mut self, backup: ProtocolRequest) -> Self {
        self.backup = Some(Box::new(backup));
        self
    }

    #[must_use]
    pub fn with_entity(mut self, metadata: &'static EntityMetadata) -> Self {
        self.entity = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EntitySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Whether both requests put the same thing on the wire: protocol,
    /// method, URL and body. Backups and sinks do not count.
    #[must_use]
    pub fn same_wire(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.method == other.method
            && self.url == other.url
            && self.body == other.body
    }

    /// `METHOD url`, used to identify the request in errors and logs
    #[must_use]
    pub fn label(&self) -> String {
        match &self.body {
            RequestBody::Csom(csom) => csom_label(csom),
            _ => format!("{} {}", self.method, self.url),
        }
    }
}

fn csom_label(request: &CsomRequest) -> String {
    let path = request
        .chain
        .iter()
        .map(|spec| match spec {
            PathSpec::Constructor { type_id, .. } => type_id.as_str(),
            PathSpec::StaticProperty { name, .. }
            | PathSpec::Identity { name }
            | PathSpec::Property { name }
            | PathSpec::Method { name, .. } => name.as_str(),
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("CSOM {path} {}", request.operation.element_name())
}

impl From<ODataRequest> for ProtocolRequest {
    fn from(request: ODataRequest) -> Self {
        Self {
            protocol: request.protocol,
            method: request.method,
            url: request.url,
            body: request.body.map_or(RequestBody::Empty, RequestBody::Json),
            backup: request.backup.map(|backup| Box::new((*backup).into())),
            sinks: Vec::new(),
            entity: None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translator_request_converts_with_backup() {
        let mut graph = ODataRequest::get(
            Protocol::Graph,
            "https://graph.microsoft.com/v1.0/sites/x?$select=displayName,id".to_owned(),
            "Web",
        );
        graph.backup = Some(Box::new(ODataRequest::get(
            Protocol::Rest,
            "https://contoso.example.com/_api/web?$select=Title,Id".to_owned(),
            "Web",
        )));

        let request = ProtocolRequest::from(graph);

        assert_eq!(request.protocol, Protocol::Graph);
        assert_eq!(request.body, RequestBody::Empty);
        let backup = request.backup.as_deref().unwrap();
        assert_eq!(backup.protocol, Protocol::Rest);
        assert_eq!(backup.url, "https://contoso.example.com/_api/web?$select=Title,Id");
    }

    #[test]
    fn test_same_wire_ignores_backup_and_sinks() {
        let a = ProtocolRequest::new(Protocol::Rest, Method::POST, "https://x/_api/web/lists")
            .with_json(json!({"Title": "Docs"}));
        let b = a.clone().with_backup(ProtocolRequest::get(Protocol::Rest, "https://x"));
        let c = ProtocolRequest::new(Protocol::Rest, Method::POST, "https://x/_api/web/lists")
            .with_json(json!({"Title": "Other"}));

        assert!(a.same_wire(&b));
        assert!(!a.same_wire(&c));
        assert_eq!(a.label(), "POST https://x/_api/web/lists");
    }

    #[test]
    fn test_csom_label_names_the_chain() {
        let request = ProtocolRequest::csom(CsomRequest::web().property("Lists").query(["Title"]));
        assert_eq!(request.label(), "CSOM Current/Web/Lists Query");
    }
}
