//! Static entity metadata tables.
//!
//! Each entity type describes, once, how its logical properties map onto the
//! REST and Graph wire names and which of them need a round trip of their own.
//! Tables are authored by hand and cached in a `LazyLock`:
//!
//! ```rust,ignore
//! static LIST: LazyLock<EntityMetadata> = LazyLock::new(|| {
//!     EntityMetadata::builder("List")
//!         .rest_uri("_api/web/lists(guid'{List.Id}')")
//!         .graph_uri("sites/{Site.GraphId}/lists/{List.Id}")
//!         .key(FieldMapping::new("Id").rest("Id").graph("id"))
//!         .field(FieldMapping::new("Title").rest("Title").graph("displayName"))
//!         .field(FieldMapping::new("Items").own_query(list_item).collection())
//!         .build()
//! });
//!
//! impl EntityModel for List {
//!     fn metadata() -> &'static EntityMetadata {
//!         &LIST
//!     }
//! }
//! ```

use crate::request::Protocol;

/// Accessor for the metadata of a related entity type
pub type MetadataFn = fn() -> &'static EntityMetadata;

/// Mapping of one logical property onto the wire.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct FieldMapping {
    pub name: &'static str,
    pub rest_name: Option<&'static str>,
    pub graph_name: Option<&'static str>,
    /// Navigation property that can be inlined with `$expand`
    pub expandable: bool,
    /// Needs its own request regardless of protocol
    pub own_query: bool,
    pub is_complex: bool,
    pub is_collection: bool,
    /// Entity type reached through this property
    pub target: Option<MetadataFn>,
    /// REST endpoint template for own-query loads; defaults to `<parent>/<rest_name>`
    pub rest_endpoint: Option<&'static str>,
    /// Graph endpoint template for own-query loads; defaults to `<parent>/<graph_name>`
    pub graph_endpoint: Option<&'static str>,
}

impl FieldMapping {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rest_name: None,
            graph_name: None,
            expandable: false,
            own_query: false,
            is_complex: false,
            is_collection: false,
            target: None,
            rest_endpoint: None,
            graph_endpoint: None,
        }
    }

    #[must_use]
    pub fn rest(mut self, wire_name: &'static str) -> Self {
        self.rest_name = Some(wire_name);
        self
    }

    #[must_use]
    pub fn graph(mut self, wire_name: &'static str) -> Self {
        self.graph_name = Some(wire_name);
        self
    }

    /// Same wire name on both protocols
    #[must_use]
    pub fn both(self, wire_name: &'static str) -> Self {
        self.rest(wire_name).graph(wire_name)
    }

    /// Navigation property inlined through `$expand`
    #[must_use]
    pub fn expand(mut self, target: MetadataFn) -> Self {
        self.expandable = true;
        self.target = Some(target);
        self
    }

    /// Property loaded by a separate request against its own endpoint
    #[must_use]
    pub fn own_query(mut self, target: MetadataFn) -> Self {
        self.own_query = true;
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn complex(mut self) -> Self {
        self.is_complex = true;
        self
    }

    #[must_use]
    pub fn collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    #[must_use]
    pub fn rest_endpoint(mut self, template: &'static str) -> Self {
        self.rest_endpoint = Some(template);
        self
    }

    #[must_use]
    pub fn graph_endpoint(mut self, template: &'static str) -> Self {
        self.graph_endpoint = Some(template);
        self
    }

    /// Wire name on `protocol`, if the property is served there
    #[must_use]
    pub fn wire_name(&self, protocol: Protocol) -> Option<&'static str> {
        match protocol {
            Protocol::Rest => self.rest_name,
            Protocol::Graph => self.graph_name,
            Protocol::Csom => None,
        }
    }

    /// Explicit own-query endpoint template on `protocol`
    #[must_use]
    pub fn endpoint(&self, protocol: Protocol) -> Option<&'static str> {
        match protocol {
            Protocol::Rest => self.rest_endpoint,
            Protocol::Graph => self.graph_endpoint,
            Protocol::Csom => None,
        }
    }

    /// Metadata of the related entity, if any
    #[must_use]
    pub fn target_metadata(&self) -> Option<&'static EntityMetadata> {
        self.target.map(|target| target())
    }
}

/// Metadata table of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub type_name: &'static str,
    /// REST endpoint template relative to the tenant site root
    pub rest_uri: Option<&'static str>,
    /// Graph endpoint template relative to the Graph root
    pub graph_uri: Option<&'static str>,
    key: FieldMapping,
    fields: Vec<FieldMapping>,
}

impl EntityMetadata {
    #[must_use]
    pub fn builder(type_name: &'static str) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            type_name,
            rest_uri: None,
            graph_uri: None,
            key: FieldMapping::new("Id").rest("Id").graph("id"),
            fields: Vec::new(),
        }
    }

    /// Identity property mapping
    #[must_use]
    pub fn key(&self) -> &FieldMapping {
        &self.key
    }

    /// Look up a logical property, including the key
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        if self.key.name == name {
            return Some(&self.key);
        }
        self.fields.iter().find(|f| f.name == name)
    }

    /// Property served under `wire_name` on `protocol`, including the key
    #[must_use]
    pub fn field_by_wire_name(&self, protocol: Protocol, wire_name: &str) -> Option<&FieldMapping> {
        std::iter::once(&self.key)
            .chain(&self.fields)
            .find(|f| f.wire_name(protocol) == Some(wire_name))
    }

    /// Declared properties in declaration order (key excluded)
    #[must_use]
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Endpoint template on `protocol`
    #[must_use]
    pub fn uri(&self, protocol: Protocol) -> Option<&'static str> {
        match protocol {
            Protocol::Rest => self.rest_uri,
            Protocol::Graph => self.graph_uri,
            Protocol::Csom => None,
        }
    }

    /// Properties loaded when a specification selects nothing explicitly:
    /// plain scalar fields, without navigation, own-query or complex ones.
    pub fn default_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields
            .iter()
            .filter(|f| !f.expandable && !f.own_query && !f.is_complex)
    }
}

/// Builder for [`EntityMetadata`]; the key defaults to `Id` / `id`.
#[must_use]
pub struct EntityMetadataBuilder {
    type_name: &'static str,
    rest_uri: Option<&'static str>,
    graph_uri: Option<&'static str>,
    key: FieldMapping,
    fields: Vec<FieldMapping>,
}

impl EntityMetadataBuilder {
    pub fn rest_uri(mut self, template: &'static str) -> Self {
        self.rest_uri = Some(template);
        self
    }

    pub fn graph_uri(mut self, template: &'static str) -> Self {
        self.graph_uri = Some(template);
        self
    }

    pub fn key(mut self, key: FieldMapping) -> Self {
        self.key = key;
        self
    }

    pub fn field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn build(self) -> EntityMetadata {
        EntityMetadata {
            type_name: self.type_name,
            rest_uri: self.rest_uri,
            graph_uri: self.graph_uri,
            key: self.key,
            fields: self.fields,
        }
    }
}

/// Implemented by entity types to expose their static metadata table.
pub trait EntityModel {
    fn metadata() -> &'static EntityMetadata;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    static FOLDER: LazyLock<EntityMetadata> = LazyLock::new(|| {
        EntityMetadata::builder("Folder")
            .rest_uri("_api/web/folders")
            .key(FieldMapping::new("UniqueId").rest("UniqueId"))
            .field(FieldMapping::new("Name").both("Name"))
            .field(FieldMapping::new("Files").own_query(folder).collection())
            .field(FieldMapping::new("Properties").rest("Properties").complex())
            .build()
    });

    fn folder() -> &'static EntityMetadata {
        &FOLDER
    }

    #[test]
    fn test_lookup_includes_key() {
        let meta = folder();
        assert_eq!(meta.key().name, "UniqueId");
        assert_eq!(meta.field("UniqueId").and_then(|f| f.rest_name), Some("UniqueId"));
        assert!(meta.field("Missing").is_none());
    }

    #[test]
    fn test_wire_names_per_protocol() {
        let name = folder().field("Name").unwrap();
        assert_eq!(name.wire_name(Protocol::Rest), Some("Name"));
        assert_eq!(name.wire_name(Protocol::Graph), Some("Name"));
        assert_eq!(name.wire_name(Protocol::Csom), None);
    }

    #[test]
    fn test_reverse_lookup_by_wire_name() {
        let meta = folder();
        assert_eq!(meta.field_by_wire_name(Protocol::Rest, "UniqueId").map(|f| f.name), Some("UniqueId"));
        assert_eq!(meta.field_by_wire_name(Protocol::Graph, "Name").map(|f| f.name), Some("Name"));
        assert!(meta.field_by_wire_name(Protocol::Graph, "Properties").is_none());
        assert!(meta.field_by_wire_name(Protocol::Csom, "Name").is_none());
    }

    #[test]
    fn test_default_fields_skip_navigation() {
        let names: Vec<_> = folder().default_fields().map(|f| f.name).collect();
        assert_eq!(names, vec!["Name"]);
    }

    #[test]
    fn test_own_query_target_resolves() {
        let files = folder().field("Files").unwrap();
        assert!(files.own_query && files.is_collection);
        assert_eq!(files.target_metadata().unwrap().type_name, "Folder");
    }
}
