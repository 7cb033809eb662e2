use serde::{Deserialize, Serialize};

/// Wire protocol serving a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Rest,
    Graph,
    Csom,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Rest => "Rest",
            Protocol::Graph => "Graph",
            Protocol::Csom => "Csom",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OData request produced by the translator.
#[derive(Clone, Debug, PartialEq)]
pub struct ODataRequest {
    pub protocol: Protocol,
    pub method: http::Method,
    /// Absolute URL including the query string
    pub url: String,
    pub body: Option<serde_json::Value>,
    /// Equivalent REST request for a Graph request
    pub backup: Option<Box<ODataRequest>>,
    /// Entity type the request loads
    pub entity: &'static str,
    /// Own-query property this request loads, `None` for the main request
    pub property: Option<&'static str>,
}

impl ODataRequest {
    #[must_use]
    pub fn get(protocol: Protocol, url: String, entity: &'static str) -> Self {
        Self {
            protocol,
            method: http::Method::GET,
            url,
            body: None,
            backup: None,
            entity,
            property: None,
        }
    }

    /// Path and query relative to `root`, used for batch sub-requests
    #[must_use]
    pub fn relative_to<'a>(&'a self, root: &str) -> &'a str {
        self.url
            .strip_prefix(root.trim_end_matches('/'))
            .map_or(self.url.as_str(), |rest| rest.trim_start_matches('/'))
    }
}
