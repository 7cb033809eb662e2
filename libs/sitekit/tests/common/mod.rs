#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sitekit::{BatchTransport, EntityMetadata, EntityModel, FieldMapping, Protocol, SiteKitConfig, TokenValues};
use sitekit_http::{HttpError, TransportResponse};
use std::sync::LazyLock;

pub const SITE_URL: &str = "https://contoso.example.com/sites/dev";
pub const GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0";

pub struct Web;

static WEB: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder("Web")
        .rest_uri("_api/web")
        .graph_uri("sites/{Site.GraphId}")
        .field(FieldMapping::new("Title").rest("Title").graph("displayName"))
        .field(FieldMapping::new("Description").rest("Description").graph("description"))
        .field(FieldMapping::new("WebTemplate").rest("WebTemplate"))
        .build()
});

impl EntityModel for Web {
    fn metadata() -> &'static EntityMetadata {
        &WEB
    }
}

pub fn tokens() -> TokenValues {
    TokenValues::new().with("Site.GraphId", "site-1")
}

pub fn config() -> SiteKitConfig {
    SiteKitConfig::for_site(SITE_URL)
}

pub fn rest_url(path: &str) -> String {
    format!("{SITE_URL}/_api/{path}")
}

pub fn graph_url(path: &str) -> String {
    format!("{GRAPH_ROOT}/{path}")
}

/// One call as the fake transport received it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub protocol: Protocol,
    pub method: String,
    pub uri: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RecordedCall {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Answers every request with `{"url": <absolute url>}`, a canned body for
/// URLs registered with `responding`, or a 404 error payload when the URL
/// contains one of the `failing` fragments. Batches are
/// unpacked and answered part by part, so results do not depend on how the
/// requests were grouped.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Vec<String>,
    bodies: Vec<(String, Value)>,
    csom_body: Option<String>,
    malformed_batches: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_owned());
        self
    }

    /// Answer URLs containing `fragment` with `body` instead of the echo.
    pub fn responding(mut self, fragment: &str, body: Value) -> Self {
        self.bodies.push((fragment.to_owned(), body));
        self
    }

    /// Answer batch calls with a body that is not a batch envelope.
    pub fn malformed_batches(mut self) -> Self {
        self.malformed_batches = true;
        self
    }

    pub fn csom_body(mut self, body: Value) -> Self {
        self.csom_body = Some(body.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn answer(&self, url: &str) -> (u16, Value) {
        if self.failing.iter().any(|fragment| url.contains(fragment.as_str())) {
            (
                404,
                json!({"error": {"code": "itemNotFound", "message": format!("{url} not found")}}),
            )
        } else if let Some((_, body)) = self.bodies.iter().find(|(fragment, _)| url.contains(fragment.as_str())) {
            (200, body.clone())
        } else {
            (200, json!({"url": url, "@odata.context": "ignored"}))
        }
    }

    fn graph_batch(&self, body: &[u8]) -> TransportResponse {
        let document: Value = serde_json::from_slice(body).unwrap();
        let responses: Vec<Value> = document["requests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|request| {
                let url = graph_url(request["url"].as_str().unwrap().trim_start_matches('/'));
                let (status, body) = self.answer(&url);
                json!({"id": request["id"], "status": status, "body": body})
            })
            .collect();
        response(200, "application/json", json!({ "responses": responses }).to_string())
    }

    fn rest_batch(&self, body: &[u8]) -> TransportResponse {
        let text = String::from_utf8_lossy(body);
        let mut parts = Vec::new();
        for line in text.lines() {
            let Some(url) = line.strip_suffix(" HTTP/1.1").and_then(|l| l.split_once(' ')).map(|(_, url)| url) else {
                continue;
            };
            let (status, body) = self.answer(url);
            parts.push(format!(
                "--batchresponse_1\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\nHTTP/1.1 {status} X\r\nCONTENT-TYPE: application/json;odata=nometadata\r\n\r\n{body}\r\n"
            ));
        }
        parts.push("--batchresponse_1--\r\n".to_owned());
        response(200, "multipart/mixed; boundary=batchresponse_1", parts.concat())
    }
}

fn response(status: u16, content_type: &'static str, body: String) -> TransportResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    TransportResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body: Bytes::from(body),
    }
}

#[async_trait]
impl BatchTransport for FakeTransport {
    async fn send(&self, protocol: Protocol, request: Request<Bytes>) -> Result<TransportResponse, HttpError> {
        let uri = request.uri().to_string();
        self.calls.lock().push(RecordedCall {
            protocol,
            method: request.method().to_string(),
            uri: uri.clone(),
            content_type: request
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            body: request.body().clone(),
        });

        Ok(match protocol {
            Protocol::Csom => response(
                200,
                "application/json",
                self.csom_body.clone().unwrap_or_else(|| "[]".to_owned()),
            ),
            Protocol::Graph | Protocol::Rest if self.malformed_batches && uri.ends_with("/$batch") => {
                response(200, "text/html", "<html>gateway</html>".to_owned())
            }
            Protocol::Graph if uri.ends_with("/$batch") => self.graph_batch(request.body()),
            Protocol::Rest if uri.ends_with("/_api/$batch") => self.rest_batch(request.body()),
            Protocol::Graph | Protocol::Rest => {
                let (status, body) = self.answer(&uri);
                response(status, "application/json", body.to_string())
            }
        })
    }
}

/// Never answers; for cancellation tests.
pub struct PendingTransport;

#[async_trait]
impl BatchTransport for PendingTransport {
    async fn send(&self, _protocol: Protocol, _request: Request<Bytes>) -> Result<TransportResponse, HttpError> {
        futures::future::pending().await
    }
}
