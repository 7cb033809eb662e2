//! Translation of load specifications into REST and Graph requests.
//!
//! The main request carries every property that can be inlined. Graph is used
//! when it can serve the whole shape and the caller prefers it; the equivalent
//! REST request then rides along as a backup so a batch that needs REST anyway
//! can absorb it. Own-query properties each get a request of their own.

use crate::Error;
use crate::filter;
use crate::load::{LoadSpecification, PropertySelector};
use crate::metadata::{EntityMetadata, EntityModel, FieldMapping};
use crate::request::{ODataRequest, Protocol};
use crate::tokens::TokenValues;

pub const DEFAULT_GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0";

/// Query option name and unencoded value
type QueryOption = (&'static str, String);

#[derive(Clone, Debug)]
pub struct TranslatorOptions {
    /// Tenant site URL that REST templates are relative to
    pub rest_root: String,
    pub graph_root: String,
    pub prefer_graph: bool,
    pub tokens: TokenValues,
}

impl TranslatorOptions {
    #[must_use]
    pub fn new(rest_root: impl Into<String>) -> Self {
        Self {
            rest_root: rest_root.into(),
            graph_root: DEFAULT_GRAPH_ROOT.to_owned(),
            prefer_graph: true,
            tokens: TokenValues::default(),
        }
    }

    #[must_use]
    pub fn with_graph_root(mut self, root: impl Into<String>) -> Self {
        self.graph_root = root.into();
        self
    }

    #[must_use]
    pub fn with_prefer_graph(mut self, prefer: bool) -> Self {
        self.prefer_graph = prefer;
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: TokenValues) -> Self {
        self.tokens = tokens;
        self
    }

    fn root(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Graph => &self.graph_root,
            Protocol::Rest | Protocol::Csom => &self.rest_root,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryTranslator {
    options: TranslatorOptions,
}

impl QueryTranslator {
    #[must_use]
    pub fn new(options: TranslatorOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &TranslatorOptions {
        &self.options
    }

    /// Translate a load of `E`.
    ///
    /// # Errors
    /// See [`QueryTranslator::translate`].
    pub fn translate_for<E: EntityModel>(
        &self,
        spec: &LoadSpecification,
    ) -> Result<Vec<ODataRequest>, Error> {
        self.translate(E::metadata(), spec)
    }

    /// Translate `spec` into the main request followed by one request per
    /// own-query property, in selector order.
    ///
    /// # Errors
    /// - [`Error::UnknownProperty`] for names missing from the metadata
    /// - [`Error::UnsupportedExpansion`] for own-query properties inside an expansion
    /// - [`Error::NoProtocol`] when neither protocol can serve a request
    /// - [`Error::UnresolvedToken`] when an endpoint template keeps a placeholder
    /// - [`Error::InvalidFilter`] / [`Error::InvalidArgument`] for malformed input
    pub fn translate(
        &self,
        meta: &EntityMetadata,
        spec: &LoadSpecification,
    ) -> Result<Vec<ODataRequest>, Error> {
        validate(meta, spec, 0)?;

        let main = spec.retain(|s| own_query_field(meta, s).is_none());
        let mut requests = vec![self.plan(
            meta,
            &main,
            |p| meta.uri(p).map(str::to_owned),
            meta.type_name,
            None,
        )?];

        for selector in spec.selectors() {
            let Some((field, nested)) = own_query_field(meta, selector) else {
                continue;
            };
            let Some(target) = field.target_metadata() else {
                continue;
            };
            let endpoint = |p: Protocol| {
                field.endpoint(p).map(str::to_owned).or_else(|| {
                    meta.uri(p)
                        .zip(field.wire_name(p))
                        .map(|(base, wire)| format!("{base}/{wire}"))
                })
            };
            requests.push(self.plan(target, &nested, endpoint, meta.type_name, Some(field.name))?);
        }

        Ok(requests)
    }

    fn plan(
        &self,
        meta: &EntityMetadata,
        spec: &LoadSpecification,
        endpoint: impl Fn(Protocol) -> Option<String>,
        entity: &'static str,
        property: Option<&'static str>,
    ) -> Result<ODataRequest, Error> {
        let graph_blocker = blocker(meta, spec, Protocol::Graph);
        let rest_blocker = blocker(meta, spec, Protocol::Rest);
        let graph = endpoint(Protocol::Graph).filter(|_| graph_blocker.is_none());
        let rest = endpoint(Protocol::Rest).filter(|_| rest_blocker.is_none());

        let build = |protocol, template: &str| {
            self.build(meta, spec, protocol, template, entity, property)
        };

        let request = match (graph, rest) {
            (Some(graph), rest) if self.options.prefer_graph || rest.is_none() => {
                let mut request = build(Protocol::Graph, &graph)?;
                if let Some(rest) = rest {
                    request.backup = Some(Box::new(build(Protocol::Rest, &rest)?));
                }
                request
            }
            (_, Some(rest)) => build(Protocol::Rest, &rest)?,
            _ => {
                return Err(Error::NoProtocol {
                    entity: meta.type_name,
                    property: rest_blocker
                        .or(graph_blocker)
                        .unwrap_or_else(|| meta.type_name.to_owned()),
                });
            }
        };

        tracing::debug!(
            entity,
            property = property.unwrap_or(""),
            protocol = %request.protocol,
            backup = request.backup.is_some(),
            "translated load"
        );
        Ok(request)
    }

    fn build(
        &self,
        meta: &EntityMetadata,
        spec: &LoadSpecification,
        protocol: Protocol,
        template: &str,
        entity: &'static str,
        property: Option<&'static str>,
    ) -> Result<ODataRequest, Error> {
        let path = self.options.tokens.resolve(template)?;
        let mut url = format!(
            "{}/{}",
            self.options.root(protocol).trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut options = query_options(meta, spec, protocol)?;
        if let Some(token) = continuation(spec) {
            options.push(("$skiptoken", token.to_owned()));
        }
        if !options.is_empty() {
            let query = options
                .iter()
                .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        let mut request = ODataRequest::get(protocol, url, entity);
        request.property = property;
        Ok(request)
    }
}

fn continuation(spec: &LoadSpecification) -> Option<&str> {
    let token = spec.continuation()?;
    if let Some(skip) = spec.skip() {
        tracing::warn!(skip, "dropping continuation token in favour of explicit $skip");
        return None;
    }
    Some(token)
}

fn field<'a>(meta: &'a EntityMetadata, name: &str) -> Result<&'a FieldMapping, Error> {
    meta.field(name).ok_or_else(|| Error::UnknownProperty {
        entity: meta.type_name,
        property: name.to_owned(),
    })
}

fn own_query_field<'a>(
    meta: &'a EntityMetadata,
    selector: &PropertySelector,
) -> Option<(&'a FieldMapping, LoadSpecification)> {
    match selector {
        PropertySelector::Simple(name) => meta
            .field(name)
            .filter(|f| f.own_query)
            .map(|f| (f, LoadSpecification::default())),
        PropertySelector::Expand(name, nested) => meta
            .field(name)
            .filter(|f| f.own_query)
            .map(|f| (f, nested.clone())),
        _ => None,
    }
}

fn validate(meta: &EntityMetadata, spec: &LoadSpecification, depth: usize) -> Result<(), Error> {
    for selector in spec.selectors() {
        match selector {
            PropertySelector::Simple(name) | PropertySelector::Expand(name, _) => {
                let field = field(meta, name)?;
                if field.own_query && depth > 0 {
                    return Err(Error::UnsupportedExpansion {
                        entity: meta.type_name,
                        property: name.clone(),
                        depth,
                    });
                }
                let PropertySelector::Expand(_, nested) = selector else {
                    continue;
                };
                if field.is_complex {
                    continue;
                }
                let target = field.target_metadata().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "{}.{name} is not a navigation property",
                        meta.type_name
                    ))
                })?;
                validate(target, nested, depth + 1)?;
            }
            PropertySelector::Filter(expr) => filter::validate(expr, meta)?,
            PropertySelector::OrderBy(name, _) => filter::resolve_path(meta, name)?,
            PropertySelector::Skip(_) | PropertySelector::Top(_) => {}
        }
    }
    Ok(())
}

/// First property that keeps `protocol` from serving `spec`, if any.
fn blocker(meta: &EntityMetadata, spec: &LoadSpecification, protocol: Protocol) -> Option<String> {
    let key = meta.key();
    if key.wire_name(protocol).is_none() {
        return Some(key.name.to_owned());
    }

    let empty = LoadSpecification::default();
    spec.selectors().iter().find_map(|selector| match selector {
        PropertySelector::Simple(name) => meta
            .field(name)
            .and_then(|f| projection_blocker(f, &empty, protocol)),
        PropertySelector::Expand(name, nested) => meta
            .field(name)
            .and_then(|f| projection_blocker(f, nested, protocol)),
        PropertySelector::Filter(expr) => match filter::render(expr, meta, protocol) {
            Err(Error::NoProtocol { property, .. }) => Some(property),
            _ => None,
        },
        PropertySelector::OrderBy(name, _) => {
            matches!(filter::wire_path(meta, name, protocol), Ok(None)).then(|| name.clone())
        }
        PropertySelector::Skip(_) | PropertySelector::Top(_) => None,
    })
}

fn projection_blocker(
    field: &FieldMapping,
    nested: &LoadSpecification,
    protocol: Protocol,
) -> Option<String> {
    if field.wire_name(protocol).is_none() {
        return Some(field.name.to_owned());
    }
    if !field.expandable || field.is_complex {
        return None;
    }
    // REST expansions cannot carry their own query options.
    if protocol == Protocol::Rest && nested.has_query_options() {
        return Some(field.name.to_owned());
    }
    let target = field.target_metadata()?;
    blocker(target, nested, protocol).map(|inner| format!("{}/{inner}", field.name))
}

fn query_options(
    meta: &EntityMetadata,
    spec: &LoadSpecification,
    protocol: Protocol,
) -> Result<Vec<QueryOption>, Error> {
    let mut select = Vec::new();
    let mut expand = Vec::new();
    match protocol {
        Protocol::Graph => graph_projection(meta, spec, &mut select, &mut expand)?,
        Protocol::Rest | Protocol::Csom => {
            rest_projection(meta, spec, "", &mut select, &mut expand)?;
        }
    }

    let mut options = vec![("$select", select.join(","))];
    if !expand.is_empty() {
        options.push(("$expand", expand.join(",")));
    }
    if let Some(expr) = spec.filter() {
        options.push(("$filter", filter::render(&expr, meta, protocol)?));
    }
    let order = spec
        .order_by()
        .map(|(name, dir)| {
            filter::mapped_path(meta, name, protocol).map(|wire| format!("{wire} {}", dir.as_str()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !order.is_empty() {
        options.push(("$orderby", order.join(",")));
    }
    if let Some(top) = spec.top() {
        options.push(("$top", top.to_string()));
    }
    if let Some(skip) = spec.skip() {
        options.push(("$skip", skip.to_string()));
    }
    Ok(options)
}

fn wire(meta: &EntityMetadata, field: &FieldMapping, protocol: Protocol) -> Result<&'static str, Error> {
    field.wire_name(protocol).ok_or_else(|| Error::NoProtocol {
        entity: meta.type_name,
        property: field.name.to_owned(),
    })
}

/// Navigation property to inline, with the shape to load through it
fn navigation<'a>(
    meta: &EntityMetadata,
    selector: &'a PropertySelector,
    empty: &'a LoadSpecification,
) -> Result<Option<(&'static EntityMetadata, &'a LoadSpecification)>, Error> {
    let (name, nested) = match selector {
        PropertySelector::Simple(name) => (name, empty),
        PropertySelector::Expand(name, nested) => (name, nested),
        _ => return Ok(None),
    };
    let field = field(meta, name)?;
    if field.is_complex {
        return Ok(None);
    }
    Ok(field.target_metadata().map(|target| (target, nested)))
}

/// `$select=Title,Lists/Title,Lists/Id,Id&$expand=Lists`
fn rest_projection(
    meta: &EntityMetadata,
    spec: &LoadSpecification,
    prefix: &str,
    select: &mut Vec<String>,
    expand: &mut Vec<String>,
) -> Result<(), Error> {
    let key = meta.key();
    if spec.has_no_projection() {
        select.extend(
            meta.default_fields()
                .filter_map(|f| f.rest_name)
                .map(|w| format!("{prefix}{w}")),
        );
    }

    let empty = LoadSpecification::default();
    for selector in spec.selectors() {
        let (PropertySelector::Simple(name) | PropertySelector::Expand(name, _)) = selector else {
            continue;
        };
        let field = field(meta, name)?;
        let path = format!("{prefix}{}", wire(meta, field, Protocol::Rest)?);
        match navigation(meta, selector, &empty)? {
            Some((target, nested)) => {
                expand.push(path.clone());
                rest_projection(target, nested, &format!("{path}/"), select, expand)?;
            }
            None if field.name == key.name => {}
            None => select.push(path),
        }
    }

    select.push(format!("{prefix}{}", wire(meta, key, Protocol::Rest)?));
    Ok(())
}

/// `$select=displayName,id&$expand=lists($select=displayName,id;$top=5)`
fn graph_projection(
    meta: &EntityMetadata,
    spec: &LoadSpecification,
    select: &mut Vec<String>,
    expand: &mut Vec<String>,
) -> Result<(), Error> {
    let key = meta.key();
    if spec.has_no_projection() {
        select.extend(
            meta.default_fields()
                .filter_map(|f| f.graph_name)
                .map(str::to_owned),
        );
    }

    let empty = LoadSpecification::default();
    for selector in spec.selectors() {
        let (PropertySelector::Simple(name) | PropertySelector::Expand(name, _)) = selector else {
            continue;
        };
        let field = field(meta, name)?;
        let wire_name = wire(meta, field, Protocol::Graph)?;
        match navigation(meta, selector, &empty)? {
            Some((target, nested)) => {
                let nested = query_options(target, nested, Protocol::Graph)?
                    .into_iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(";");
                expand.push(format!("{wire_name}({nested})"));
            }
            None if field.name == key.name => {}
            None => select.push(wire_name.to_owned()),
        }
    }

    select.push(wire(meta, key, Protocol::Graph)?.to_owned());
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::SortDir;
    use std::sync::LazyLock;

    static DRIVE: LazyLock<EntityMetadata> = LazyLock::new(|| {
        EntityMetadata::builder("Drive")
            .rest_uri("_api/web/defaultdocumentlibrary")
            .graph_uri("drives/{Drive.Id}")
            .field(FieldMapping::new("Name").rest("Title").graph("name"))
            .field(FieldMapping::new("Quota").graph("quota").complex())
            .build()
    });

    fn translator() -> QueryTranslator {
        QueryTranslator::new(
            TranslatorOptions::new("https://contoso.example.com/sites/dev/")
                .with_tokens(TokenValues::new().with("Drive.Id", "d1")),
        )
    }

    #[test]
    fn test_graph_preferred_with_rest_backup() {
        let spec = LoadSpecification::builder().select("Name").build();
        let requests = translator().translate(&DRIVE, &spec).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://graph.microsoft.com/v1.0/drives/d1?$select=name%2Cid"
        );
        let backup = requests[0].backup.as_deref().unwrap();
        assert_eq!(
            backup.url,
            "https://contoso.example.com/sites/dev/_api/web/defaultdocumentlibrary?$select=Title%2CId"
        );
    }

    #[test]
    fn test_complex_field_is_selected() {
        let spec = LoadSpecification::builder()
            .expand("Quota", |q| q)
            .order_by("Name", SortDir::Asc)
            .build();
        let requests = translator().translate(&DRIVE, &spec).unwrap();
        assert_eq!(requests[0].protocol, Protocol::Graph);
        assert!(requests[0].backup.is_none());
        assert!(requests[0].url.ends_with("?$select=quota%2Cid&$orderby=name%20asc"));
    }

    #[test]
    fn test_key_selected_once() {
        let spec = LoadSpecification::builder().select("Id").select("Name").build();
        let requests = translator().translate(&DRIVE, &spec).unwrap();
        assert!(requests[0].url.ends_with("?$select=name%2Cid"));
    }
}
