//! Batch execution: planning, sending and demultiplexing.
//!
//! A batch is partitioned by protocol in submission order. When it mixes
//! Graph and REST work and every Graph request has a REST backup, the backups
//! replace the Graph requests so the batch costs one REST round trip. Equal
//! wire requests are sent once and answer every queued request that needs
//! them. REST and Graph partitions are chunked by their size limit; the CSOM
//! partition becomes one document.

use crate::batch::{Batch, QueuedRequest};
use crate::config::SiteKitConfig;
use crate::dispatch::BatchTransport;
use crate::envelope::{EnvelopeError, SubRequest, SubResponse, graph, rest};
use crate::error::{ClientError, ServiceError, SiteError};
use crate::request::{ProtocolRequest, RequestBody};
use crate::response::ResponseEnvelope;
use crate::slot::SlotResult;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use http::header::{ACCEPT, CONTENT_TYPE};
use sitekit_csom::DocumentBuilder;
use sitekit_http::{HttpError, TransportResponse};
use sitekit_odata::Protocol;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const GRAPH_JSON: &str = "application/json";

/// How a failed request affects the rest of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecuteMode {
    /// The first failure faults every unresolved request and is returned
    #[default]
    Default,
    /// Failures fault only their own requests and are listed in the report
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    /// `METHOD url` of the queued request
    pub request: String,
    pub error: SiteError,
}

/// Summary of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Queued requests after de-duplication
    pub requests: usize,
    /// HTTP calls made
    pub round_trips: usize,
    pub failures: Vec<RequestFailure>,
}

/// A request as it goes on the wire and the queued requests it answers.
#[derive(Debug)]
struct WireRequest {
    request: ProtocolRequest,
    targets: Vec<usize>,
}

impl WireRequest {
    fn label(&self) -> String {
        self.request.label()
    }

    fn sub_request(&self) -> SubRequest {
        SubRequest {
            method: self.request.method.clone(),
            url: self.request.url.clone(),
            body: match &self.request.body {
                RequestBody::Json(body) => Some(body.clone()),
                RequestBody::Empty | RequestBody::Csom(_) => None,
            },
        }
    }
}

#[derive(Debug)]
enum Call {
    Direct(WireRequest),
    Batch(Protocol, Vec<WireRequest>),
    Csom(Vec<WireRequest>),
}

type Outcome = (Vec<usize>, SlotResult);

/// Executes batches over a [`BatchTransport`].
#[derive(Clone)]
pub struct Orchestrator {
    transport: Arc<dyn BatchTransport>,
    config: Arc<SiteKitConfig>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(transport: Arc<dyn BatchTransport>, config: Arc<SiteKitConfig>) -> Self {
        Self { transport, config }
    }

    /// Send every queued request of `batch` and resolve its slots.
    ///
    /// # Errors
    /// In [`ExecuteMode::Default`] the first request failure, after every
    /// unresolved slot has been faulted with it. [`SiteError::Canceled`] when
    /// `cancel` fires first; slots still pending are canceled.
    pub async fn execute(
        &self,
        batch: Batch,
        mode: ExecuteMode,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, SiteError> {
        let calls = plan(batch.queued(), &self.config);
        let mut report = BatchReport {
            requests: batch.len(),
            round_trips: calls.len(),
            failures: Vec::new(),
        };
        tracing::debug!(
            batch = %batch.id(),
            requests = report.requests,
            round_trips = report.round_trips,
            "executing batch"
        );

        let concurrency = self.config.batch.concurrency.max(1);
        let mut outcomes = std::pin::pin!(
            futures::stream::iter(calls)
                .map(|call| self.send(call))
                .buffered(concurrency)
        );

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(batch = %batch.id(), "batch execution canceled");
                    return Err(SiteError::Canceled {
                        request: batch.id().to_string(),
                    });
                }
                next = outcomes.next() => next,
            };
            let Some(outcome) = next else {
                break;
            };

            for (targets, result) in outcome {
                match result {
                    Ok(envelope) => deliver(batch.queued(), &targets, &envelope),
                    Err(error) => {
                        for &target in &targets {
                            let queued = &batch.queued()[target];
                            queued.slot.resolve(Err(error.clone()));
                            report.failures.push(RequestFailure {
                                request: queued.slot.request().to_owned(),
                                error: error.clone(),
                            });
                        }
                        if mode == ExecuteMode::Default {
                            fault_unresolved(batch.queued(), &error);
                            return Err(error);
                        }
                    }
                }
            }
        }

        if !report.failures.is_empty() {
            tracing::debug!(batch = %batch.id(), failures = report.failures.len(), "batch executed with failures");
        }
        Ok(report)
    }

    async fn send(&self, call: Call) -> Vec<Outcome> {
        match call {
            Call::Direct(wire) => vec![self.send_direct(wire).await],
            Call::Batch(protocol, wire) => self.send_batch(protocol, wire).await,
            Call::Csom(wire) => self.send_csom(wire).await,
        }
    }

    async fn send_direct(&self, wire: WireRequest) -> Outcome {
        let protocol = wire.request.protocol;
        let label = wire.label();
        let sub = wire.sub_request();
        let (accept, content_type) = match protocol {
            Protocol::Graph => (GRAPH_JSON, GRAPH_JSON),
            _ => (rest::ACCEPT, rest::JSON_CONTENT_TYPE),
        };
        let body = sub
            .body
            .as_ref()
            .map(|body| Bytes::from(body.to_string()))
            .unwrap_or_default();
        let content_type = sub.body.is_some().then_some(content_type);

        let result = match self.call(protocol, sub.method, &sub.url, content_type, accept, body).await {
            Ok(response) => sub_result(
                protocol,
                &label,
                SubResponse {
                    status: response.status.as_u16(),
                    body: response.body,
                },
            ),
            Err(err) => Err(SiteError::from_http(protocol, &label, &err)),
        };
        (wire.targets, result)
    }

    async fn send_batch(&self, protocol: Protocol, wire: Vec<WireRequest>) -> Vec<Outcome> {
        let subs: Vec<SubRequest> = wire.iter().map(WireRequest::sub_request).collect();
        let encoded = match protocol {
            Protocol::Graph => graph::encode(&subs, self.config.graph_root())
                .map(|body| (format!("{}/$batch", self.config.graph_root()), GRAPH_JSON.to_owned(), body)),
            _ => {
                let batch = rest::encode(&subs);
                Ok((
                    format!("{}/_api/$batch", self.config.site_root()),
                    batch.content_type(),
                    batch.body.into_bytes(),
                ))
            }
        };
        let (url, content_type, body) = match encoded {
            Ok(encoded) => encoded,
            Err(err) => return fail_each(wire, |label| envelope_error(protocol, label, &err)),
        };

        tracing::debug!(%protocol, requests = wire.len(), "sending batch");
        let accept = if protocol == Protocol::Graph { GRAPH_JSON } else { rest::ACCEPT };
        let response = match self
            .call(protocol, Method::POST, &url, Some(content_type.as_str()), accept, Bytes::from(body))
            .await
        {
            Ok(response) => response,
            Err(err) => return fail_each(wire, |label| SiteError::from_http(protocol, label, &err)),
        };
        if !response.is_success() {
            return fail_each(wire, |label| {
                SiteError::Service(ServiceError::from_response(
                    protocol,
                    label,
                    response.status.as_u16(),
                    &response.body,
                ))
            });
        }

        let decoded = match protocol {
            Protocol::Graph => graph::decode(&response.body, wire.len()),
            _ => rest::decode(response.content_type(), &response.body, wire.len()),
        };
        let subs = match decoded {
            Ok(subs) => subs,
            Err(err) => return fail_each(wire, |label| envelope_error(protocol, label, &err)),
        };
        wire.into_iter()
            .zip(subs)
            .map(|(wire, sub)| {
                let label = wire.label();
                let result = match sub {
                    Some(sub) => sub_result(protocol, &label, sub),
                    None => Err(SiteError::Protocol {
                        protocol,
                        message: "no sub-response in the batch answer".to_owned(),
                        request: label,
                    }),
                };
                (wire.targets, result)
            })
            .collect()
    }

    async fn send_csom(&self, wire: Vec<WireRequest>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        let mut builder = DocumentBuilder::new();
        let mut encoded = Vec::with_capacity(wire.len());
        for wire in wire {
            let added = match &wire.request.body {
                RequestBody::Csom(request) => builder
                    .add(request)
                    .map_err(|err| SiteError::from_csom(&wire.label(), 0, &err)),
                _ => Err(SiteError::Client(ClientError::InvalidArgument(format!(
                    "CSOM request without a CSOM body: {}",
                    wire.label()
                )))),
            };
            match added {
                Ok(_) => encoded.push(wire),
                Err(err) => outcomes.push((wire.targets, Err(err))),
            }
        }
        if encoded.is_empty() {
            return outcomes;
        }

        let document = builder.build();
        let xml = match document.to_xml(&self.config.application_name) {
            Ok(xml) => xml,
            Err(err) => {
                outcomes.extend(fail_each(encoded, |label| SiteError::from_csom(label, 0, &err)));
                return outcomes;
            }
        };

        let url = format!("{}/{}", self.config.site_root(), sitekit_csom::PROCESS_QUERY_PATH);
        tracing::debug!(
            requests = encoded.len(),
            paths = document.paths.len(),
            "sending CSOM document"
        );
        let response = match self
            .call(Protocol::Csom, Method::POST, &url, Some("text/xml"), "*/*", Bytes::from(xml))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                outcomes.extend(fail_each(encoded, |label| SiteError::from_http(Protocol::Csom, label, &err)));
                return outcomes;
            }
        };
        let status = response.status.as_u16();
        if !response.is_success() {
            outcomes.extend(fail_each(encoded, |label| {
                SiteError::Service(ServiceError::from_response(Protocol::Csom, label, status, &response.body))
            }));
            return outcomes;
        }

        match sitekit_csom::decode(&document, &response.body) {
            Ok(decoded) => outcomes.extend(encoded.into_iter().zip(decoded.results).map(|(wire, result)| {
                let result = result
                    .map(|value| Arc::new(ResponseEnvelope::csom(value)))
                    .map_err(|err| SiteError::from_csom(&wire.label(), status, &err));
                (wire.targets, result)
            })),
            Err(err) => outcomes.extend(fail_each(encoded, |label| SiteError::from_csom(label, status, &err))),
        }
        outcomes
    }

    async fn call(
        &self,
        protocol: Protocol,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        accept: &str,
        body: Bytes,
    ) -> Result<TransportResponse, HttpError> {
        let mut request = http::Request::builder().method(method).uri(url).header(ACCEPT, accept);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        let request = request.body(body)?;
        self.transport.send(protocol, request).await
    }
}

fn plan(queued: &[QueuedRequest], config: &SiteKitConfig) -> Vec<Call> {
    let count = |protocol: Protocol| queued.iter().filter(|q| q.request.protocol == protocol).count();
    let graph_requests = count(Protocol::Graph);
    let substitute = graph_requests > 0
        && count(Protocol::Rest) > 0
        && queued.iter().all(|q| {
            q.request.protocol != Protocol::Graph
                || q.request
                    .backup
                    .as_deref()
                    .is_some_and(|b| b.protocol == Protocol::Rest)
        });
    if substitute {
        tracing::debug!(graph_requests, "serving Graph requests from their REST backups");
    }

    let wire_for = |protocol: Protocol| {
        dedup(queued.iter().enumerate().filter_map(|(index, q)| {
            let request = match (q.request.protocol, substitute) {
                (p, _) if p == protocol => &q.request,
                (Protocol::Graph, true) if protocol == Protocol::Rest => q.request.backup.as_deref()?,
                _ => return None,
            };
            Some((index, request))
        }))
    };

    let mut calls = Vec::new();
    for protocol in [Protocol::Rest, Protocol::Graph, Protocol::Csom] {
        if substitute && protocol == Protocol::Graph {
            continue;
        }
        let wire = wire_for(protocol);
        if wire.is_empty() {
            continue;
        }
        if protocol == Protocol::Csom {
            calls.push(Call::Csom(wire));
            continue;
        }
        if wire.len() == 1 && config.batch.direct_single {
            calls.extend(wire.into_iter().map(Call::Direct));
            continue;
        }

        let max = config.protocol(protocol).max_batch_size.max(1);
        if wire.len() > max {
            tracing::debug!(%protocol, requests = wire.len(), max, "splitting batch");
        }
        let mut wire = wire.into_iter().peekable();
        while wire.peek().is_some() {
            calls.push(Call::Batch(protocol, wire.by_ref().take(max).collect()));
        }
    }
    calls
}

/// Collapse equal wire requests, keeping the first occurrence's position.
fn dedup<'a>(requests: impl Iterator<Item = (usize, &'a ProtocolRequest)>) -> Vec<WireRequest> {
    let mut wire: Vec<WireRequest> = Vec::new();
    for (index, request) in requests {
        if let Some(existing) = wire.iter_mut().find(|w| w.request.same_wire(request)) {
            existing.targets.push(index);
            continue;
        }
        wire.push(WireRequest {
            request: ProtocolRequest {
                protocol: request.protocol,
                method: request.method.clone(),
                url: request.url.clone(),
                body: request.body.clone(),
                backup: None,
                sinks: Vec::new(),
                entity: None,
            },
            targets: vec![index],
        });
    }
    wire
}

fn sub_result(protocol: Protocol, label: &str, sub: SubResponse) -> SlotResult {
    if sub.is_success() {
        Ok(Arc::new(ResponseEnvelope::from_json_body(protocol, sub.status, sub.body)))
    } else {
        Err(SiteError::Service(ServiceError::from_response(
            protocol, label, sub.status, &sub.body,
        )))
    }
}

fn envelope_error(protocol: Protocol, request: &str, err: &EnvelopeError) -> SiteError {
    SiteError::Protocol {
        protocol,
        request: request.to_owned(),
        message: err.to_string(),
    }
}

fn fail_each(wire: Vec<WireRequest>, error: impl Fn(&str) -> SiteError) -> Vec<Outcome> {
    wire.into_iter()
        .map(|w| {
            let err = error(&w.label());
            (w.targets, Err(err))
        })
        .collect()
}

fn deliver(queued: &[QueuedRequest], targets: &[usize], envelope: &Arc<ResponseEnvelope>) {
    for &target in targets {
        let queued = &queued[target];
        if queued.slot.is_resolved() {
            continue;
        }
        if !queued.request.sinks.is_empty() {
            let logical = queued.request.entity.map(|metadata| envelope.to_logical(metadata));
            let view = logical.as_ref().unwrap_or(envelope);
            for sink in &queued.request.sinks {
                sink.accept(view);
                sink.mark_populated();
            }
        }
        queued.slot.resolve(Ok(Arc::clone(envelope)));
    }
}

fn fault_unresolved(queued: &[QueuedRequest], error: &SiteError) {
    let faulted = queued
        .iter()
        .filter(|q| q.slot.resolve(Err(error.clone())))
        .count();
    if faulted > 0 {
        tracing::debug!(faulted, "faulted pending requests after failure");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::batch::BatchRegistry;

    fn config() -> SiteKitConfig {
        SiteKitConfig::for_site("https://contoso.example.com/sites/dev")
    }

    fn rest(path: &str) -> ProtocolRequest {
        ProtocolRequest::get(Protocol::Rest, format!("https://contoso.example.com/sites/dev/_api/{path}"))
    }

    fn graph(path: &str) -> ProtocolRequest {
        ProtocolRequest::get(Protocol::Graph, format!("https://graph.microsoft.com/v1.0/{path}"))
    }

    fn batch_of(requests: impl IntoIterator<Item = ProtocolRequest>) -> Batch {
        let mut registry = BatchRegistry::new();
        for request in requests {
            registry.enqueue(request);
        }
        let id = registry.ensure();
        registry.take(id).unwrap()
    }

    fn shape(calls: &[Call]) -> Vec<(Protocol, usize)> {
        calls
            .iter()
            .map(|call| match call {
                Call::Direct(w) => (w.request.protocol, 1),
                Call::Batch(p, w) => (*p, w.len()),
                Call::Csom(w) => (Protocol::Csom, w.len()),
            })
            .collect()
    }

    #[test]
    fn test_backups_merge_into_one_rest_batch() {
        let batch = batch_of([
            graph("sites/x").with_backup(rest("web")),
            rest("web/lists"),
            graph("sites/x/lists").with_backup(rest("web/lists")),
        ]);

        let calls = plan(batch.queued(), &config());

        // the second backup equals the queued REST request and is sent once
        assert_eq!(shape(&calls), vec![(Protocol::Rest, 2)]);
        let Call::Batch(_, wire) = &calls[0] else {
            panic!("expected a batch call");
        };
        assert_eq!(wire[0].targets, vec![0]);
        assert_eq!(wire[1].targets, vec![1, 2]);
    }

    #[test]
    fn test_graph_without_backup_keeps_partitions() {
        let batch = batch_of([
            graph("sites/x").with_backup(rest("web")),
            graph("sites/x/drive"),
            rest("web/lists"),
        ]);

        let calls = plan(batch.queued(), &config());

        assert_eq!(shape(&calls), vec![(Protocol::Rest, 1), (Protocol::Graph, 2)]);
        assert!(matches!(calls[0], Call::Direct(_)));
    }

    #[test]
    fn test_partitions_are_chunked_by_size_limit() {
        let batch = batch_of((0..45).map(|i| graph(&format!("sites/x/lists/{i}"))));

        let calls = plan(batch.queued(), &config());

        assert_eq!(
            shape(&calls),
            vec![(Protocol::Graph, 20), (Protocol::Graph, 20), (Protocol::Graph, 5)]
        );
        let targets: Vec<usize> = calls
            .iter()
            .flat_map(|call| match call {
                Call::Batch(_, wire) => wire.iter().flat_map(|w| w.targets.clone()).collect(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(targets, (0..45).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_request_goes_direct_unless_disabled() {
        let batch = batch_of([rest("web")]);
        let mut config = config();
        assert!(matches!(plan(batch.queued(), &config)[0], Call::Direct(_)));

        config.batch.direct_single = false;
        assert_eq!(shape(&plan(batch.queued(), &config)), vec![(Protocol::Rest, 1)]);
    }

    #[test]
    fn test_csom_is_one_document() {
        let batch = batch_of((0..150).map(|i| {
            ProtocolRequest::csom(
                sitekit_csom::CsomRequest::web()
                    .method("GetList", [format!("/lists/{i}")])
                    .query(["Title"]),
            )
        }));

        assert_eq!(shape(&plan(batch.queued(), &config())), vec![(Protocol::Csom, 150)]);
    }
}
