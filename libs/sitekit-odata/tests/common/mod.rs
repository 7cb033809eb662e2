#![allow(dead_code)]

use sitekit_odata::{EntityMetadata, EntityModel, FieldMapping, TokenValues, TranslatorOptions};
use std::sync::LazyLock;

pub const SITE_URL: &str = "https://contoso.example.com/sites/dev";
pub const GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0";

pub struct Web;
pub struct List;
pub struct ListItem;

static WEB: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder("Web")
        .rest_uri("_api/web")
        .graph_uri("sites/{Site.GraphId}")
        .field(FieldMapping::new("Title").rest("Title").graph("displayName"))
        .field(FieldMapping::new("Description").rest("Description").graph("description"))
        .field(FieldMapping::new("Created").rest("Created").graph("createdDateTime"))
        .field(FieldMapping::new("WebTemplate").rest("WebTemplate"))
        .field(FieldMapping::new("ThemeInfo"))
        .field(
            FieldMapping::new("Lists")
                .rest("Lists")
                .graph("lists")
                .expand(List::metadata)
                .collection(),
        )
        .build()
});

static LIST: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder("List")
        .rest_uri("_api/web/lists(guid'{List.Id}')")
        .graph_uri("sites/{Site.GraphId}/lists/{List.Id}")
        .field(FieldMapping::new("Title").rest("Title").graph("displayName"))
        .field(FieldMapping::new("Description").rest("Description").graph("description"))
        .field(FieldMapping::new("ItemCount").rest("ItemCount"))
        .field(
            FieldMapping::new("Items")
                .rest("Items")
                .graph("items")
                .own_query(ListItem::metadata)
                .collection(),
        )
        .build()
});

static LIST_ITEM: LazyLock<EntityMetadata> = LazyLock::new(|| {
    EntityMetadata::builder("ListItem")
        .field(FieldMapping::new("Title").rest("Title"))
        .field(FieldMapping::new("Modified").rest("Modified").graph("lastModifiedDateTime"))
        .field(FieldMapping::new("Versions").rest("Versions").own_query(ListItem::metadata))
        .build()
});

impl EntityModel for Web {
    fn metadata() -> &'static EntityMetadata {
        &WEB
    }
}

impl EntityModel for List {
    fn metadata() -> &'static EntityMetadata {
        &LIST
    }
}

impl EntityModel for ListItem {
    fn metadata() -> &'static EntityMetadata {
        &LIST_ITEM
    }
}

pub fn tokens() -> TokenValues {
    TokenValues::new()
        .with("Site.GraphId", "site-1")
        .with("List.Id", "list-1")
}

pub fn options() -> TranslatorOptions {
    TranslatorOptions::new(SITE_URL)
        .with_graph_root(GRAPH_ROOT)
        .with_tokens(tokens())
}

/// Path and decoded query pairs of a request URL
pub fn split(url: &str) -> (String, Vec<(String, String)>) {
    let parsed = url::Url::parse(url).unwrap();
    let pairs = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    (format!("{}{}", parsed.origin().ascii_serialization(), parsed.path()), pairs)
}

pub fn param(url: &str, name: &str) -> Option<String> {
    split(url)
        .1
        .into_iter()
        .find_map(|(k, v)| (k == name).then_some(v))
}
