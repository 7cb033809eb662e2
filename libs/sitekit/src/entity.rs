//! Entity-side collaborators: the extra-field bag and response sinks.

use crate::response::{ResponseEnvelope, ResponseValue};
use indexmap::IndexMap;
use parking_lot::Mutex;
use sitekit_csom::ClientValue;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Loosely typed value of a field the entity type does not model.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(IndexMap<String, FieldValue>),
    List(Vec<FieldValue>),
}

static NULL: FieldValue = FieldValue::Null;

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, FieldValue>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::String(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => FieldValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<ClientValue> for FieldValue {
    fn from(value: ClientValue) -> Self {
        match value {
            ClientValue::Null => FieldValue::Null,
            ClientValue::Bool(b) => FieldValue::Bool(b),
            ClientValue::Int(n) | ClientValue::Enum(n) => FieldValue::Number(n.into()),
            ClientValue::Double(n) => serde_json::Number::from_f64(n).map_or(FieldValue::Null, FieldValue::Number),
            ClientValue::String(s) => FieldValue::String(s),
            ClientValue::Guid(g) => FieldValue::String(g.to_string()),
            ClientValue::DateTime(d) => FieldValue::String(d.to_rfc3339()),
            ClientValue::Object(map) => FieldValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
            ClientValue::Array(items) => FieldValue::List(items.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

/// Fields returned by the service that the entity type does not model, in
/// the order the service sent them.
///
/// Typed accessors and the dynamic `get`/index view read the same map; any
/// mutation marks the bag dirty until [`ExtraFields::mark_clean`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraFields {
    values: IndexMap<String, FieldValue>,
    dirty: bool,
}

impl ExtraFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Mutable access; marks the bag dirty whether or not the value changes.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        let value = self.values.get_mut(name)?;
        self.dirty = true;
        Some(value)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(FieldValue::as_bool)
    }

    #[must_use]
    pub fn get_map(&self, name: &str) -> Option<&IndexMap<String, FieldValue>> {
        self.get(name).and_then(FieldValue::as_map)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.dirty = true;
        self.values.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let removed = self.values.shift_remove(name);
        self.dirty |= removed.is_some();
        removed
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use = "iterators are lazy"]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Replace values with what the service returned, leaving the bag clean.
    pub(crate) fn load(&mut self, values: impl IntoIterator<Item = (String, FieldValue)>) {
        self.values.extend(values);
        self.dirty = false;
    }
}

impl Index<&str> for ExtraFields {
    type Output = FieldValue;

    /// Missing fields read as [`FieldValue::Null`].
    fn index(&self, name: &str) -> &FieldValue {
        self.values.get(name).unwrap_or(&NULL)
    }
}

impl IndexMut<&str> for ExtraFields {
    /// Inserts [`FieldValue::Null`] for a missing field.
    fn index_mut(&mut self, name: &str) -> &mut FieldValue {
        self.dirty = true;
        self.values.entry(name.to_owned()).or_default()
    }
}

/// Receiver of a request's decoded payload.
///
/// Sinks attached to a request see every successful response exactly once,
/// before the response slot resolves.
pub trait EntitySink: Send + Sync {
    fn accept(&self, response: &ResponseEnvelope);

    fn mark_populated(&self);
}

/// Generic sink keeping the payload's top-level fields in an [`ExtraFields`]
/// bag; `known` fields are skipped so a typed entity can read them itself.
#[derive(Debug, Default)]
pub struct EntityRecord {
    known: Vec<&'static str>,
    fields: Mutex<ExtraFields>,
    populated: AtomicBool,
}

impl EntityRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_known_fields(known: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            known: known.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Snapshot of the unmodeled fields
    #[must_use]
    pub fn extra_fields(&self) -> ExtraFields {
        self.fields.lock().clone()
    }

    /// Run `f` against the bag under its lock.
    pub fn with_extra_fields<R>(&self, f: impl FnOnce(&mut ExtraFields) -> R) -> R {
        f(&mut self.fields.lock())
    }
}

impl EntitySink for EntityRecord {
    fn accept(&self, response: &ResponseEnvelope) {
        let entries: Vec<(String, FieldValue)> = match &response.value {
            ResponseValue::Json(serde_json::Value::Object(map)) => map
                .iter()
                .filter(|(name, _)| !name.starts_with("@odata.") && !name.starts_with("odata."))
                .map(|(name, value)| (name.clone(), value.clone().into()))
                .collect(),
            ResponseValue::Csom(ClientValue::Object(map)) => map
                .iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .map(|(name, value)| (name.clone(), value.clone().into()))
                .collect(),
            _ => return,
        };
        let entries = entries
            .into_iter()
            .filter(|(name, _)| !self.known.iter().any(|known| *known == name.as_str()));
        self.fields.lock().load(entries);
    }

    fn mark_populated(&self) {
        self.populated.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_typed_and_dynamic_views_share_storage() {
        let mut fields = ExtraFields::new();
        fields.insert("Title", "Docs");
        fields.insert("ItemCount", 12_i64);
        fields.insert("Hidden", false);

        assert_eq!(fields.get_str("Title"), Some("Docs"));
        assert_eq!(fields["Title"].as_str(), Some("Docs"));
        assert_eq!(fields.get_i64("ItemCount"), Some(12));
        assert_eq!(fields.get_f64("ItemCount"), Some(12.0));
        assert_eq!(fields.get_bool("Hidden"), Some(false));
        assert!(fields["Missing"].is_null());
        assert_eq!(fields.get_str("ItemCount"), None);
    }

    #[test]
    fn test_every_mutation_marks_dirty() {
        let mut fields = ExtraFields::new();
        fields.load([("Title".to_owned(), FieldValue::from("Docs"))]);
        assert!(!fields.is_dirty());

        fields["Title"] = FieldValue::from("Renamed");
        assert!(fields.is_dirty());
        assert_eq!(fields.get_str("Title"), Some("Renamed"));

        fields.mark_clean();
        if let Some(value) = fields.get_mut("Title") {
            *value = FieldValue::Null;
        }
        assert!(fields.is_dirty());

        fields.mark_clean();
        assert!(fields.remove("Nope").is_none());
        assert!(!fields.is_dirty());
        fields.remove("Title");
        assert!(fields.is_dirty());
    }

    #[test]
    fn test_nested_maps_from_json() {
        let value = FieldValue::from(json!({"Author": {"Title": "Ann", "Id": 7}, "Tags": ["a", "b"]}));
        let FieldValue::Map(map) = value else {
            panic!("expected map");
        };
        let mut fields = ExtraFields::new();
        fields.load(map);

        let author = fields.get_map("Author").unwrap();
        assert_eq!(author["Id"].as_i64(), Some(7));
        assert_eq!(fields["Tags"].as_list().map(<[FieldValue]>::len), Some(2));
    }

    #[test]
    fn test_field_order_follows_the_payload() {
        let FieldValue::Map(map) = FieldValue::from(json!({"Zeta": 1, "Alpha": {"Y": 1, "B": 2}, "Mid": 3}))
        else {
            panic!("expected map");
        };
        let mut fields = ExtraFields::new();
        fields.load(map);
        fields.remove("Alpha");
        fields.insert("Beta", true);

        let names: Vec<&str> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Zeta", "Mid", "Beta"]);
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let record = EntityRecord::with_known_fields(["Title"]);
        let response = ResponseEnvelope {
            protocol: sitekit_odata::Protocol::Rest,
            status: 200,
            body: Bytes::new(),
            value: ResponseValue::Json(json!({
                "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#sites/$entity",
                "Title": "Dev",
                "WebTemplate": "STS"
            })),
        };

        record.accept(&response);
        record.mark_populated();

        let extra = record.extra_fields();
        assert!(record.is_populated());
        assert_eq!(extra.len(), 1);
        assert_eq!(extra.get_str("WebTemplate"), Some("STS"));
        assert!(!extra.is_dirty());
    }
}
