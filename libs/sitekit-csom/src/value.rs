//! Typed values exchanged with the client object model endpoint.

use crate::error::CsomError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Key holding the server type of a returned object
pub const OBJECT_TYPE_KEY: &str = "_ObjectType_";
/// Key holding the members of a returned collection
pub const CHILD_ITEMS_KEY: &str = "_Child_Items_";

/// Parameter or decoded result value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Enumeration member by numeric value
    Enum(i64),
    String(String),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Object(BTreeMap<String, ClientValue>),
    Array(Vec<ClientValue>),
}

impl ClientValue {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientValue::Null => "null",
            ClientValue::Bool(_) => "bool",
            ClientValue::Int(_) => "int",
            ClientValue::Double(_) => "double",
            ClientValue::Enum(_) => "enum",
            ClientValue::String(_) => "string",
            ClientValue::Guid(_) => "guid",
            ClientValue::DateTime(_) => "datetime",
            ClientValue::Object(_) => "object",
            ClientValue::Array(_) => "array",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ClientValue::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClientValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ClientValue::Int(n) | ClientValue::Enum(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ClientValue::Double(n) => Some(*n),
            ClientValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ClientValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            ClientValue::Guid(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ClientValue::DateTime(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Member of an object value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ClientValue> {
        match self {
            ClientValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Server type name of an object value
    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        self.get(OBJECT_TYPE_KEY).and_then(ClientValue::as_str)
    }

    /// Members of a returned collection
    #[must_use]
    pub fn child_items(&self) -> Option<&[ClientValue]> {
        match self.get(CHILD_ITEMS_KEY) {
            Some(ClientValue::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// `Type` attribute and text of a `<Parameter>` element.
    pub(crate) fn parameter(&self) -> Result<(&'static str, Option<String>), CsomError> {
        Ok(match self {
            ClientValue::Null => ("Null", None),
            ClientValue::Bool(b) => ("Boolean", Some(b.to_string())),
            ClientValue::Int(n) if i32::try_from(*n).is_ok() => ("Int32", Some(n.to_string())),
            ClientValue::Int(n) => ("Int64", Some(n.to_string())),
            ClientValue::Double(n) => ("Double", Some(n.to_string())),
            ClientValue::Enum(n) => ("Enum", Some(n.to_string())),
            ClientValue::String(s) => ("String", Some(s.clone())),
            ClientValue::Guid(id) => ("Guid", Some(format!("{{{id}}}"))),
            ClientValue::DateTime(ts) => (
                "DateTime",
                Some(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
            ClientValue::Object(_) | ClientValue::Array(_) => {
                return Err(CsomError::UnsupportedParameter(self.kind()));
            }
        })
    }

    /// Convert a decoded JSON payload, turning `/Date(...)/` and `/Guid(...)/`
    /// strings into typed values.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> ClientValue {
        match value {
            serde_json::Value::Null => ClientValue::Null,
            serde_json::Value::Bool(b) => ClientValue::Bool(b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || ClientValue::Double(n.as_f64().unwrap_or(f64::NAN)),
                ClientValue::Int,
            ),
            serde_json::Value::String(s) => parse_tagged(&s).unwrap_or(ClientValue::String(s)),
            serde_json::Value::Array(items) => {
                ClientValue::Array(items.into_iter().map(ClientValue::from_json).collect())
            }
            serde_json::Value::Object(map) => ClientValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ClientValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ClientValue {
    fn from(v: &str) -> Self {
        ClientValue::String(v.to_owned())
    }
}

impl From<String> for ClientValue {
    fn from(v: String) -> Self {
        ClientValue::String(v)
    }
}

impl From<bool> for ClientValue {
    fn from(v: bool) -> Self {
        ClientValue::Bool(v)
    }
}

impl From<i32> for ClientValue {
    fn from(v: i32) -> Self {
        ClientValue::Int(i64::from(v))
    }
}

impl From<i64> for ClientValue {
    fn from(v: i64) -> Self {
        ClientValue::Int(v)
    }
}

impl From<Uuid> for ClientValue {
    fn from(v: Uuid) -> Self {
        ClientValue::Guid(v)
    }
}

impl From<DateTime<Utc>> for ClientValue {
    fn from(v: DateTime<Utc>) -> Self {
        ClientValue::DateTime(v)
    }
}

fn parse_tagged(s: &str) -> Option<ClientValue> {
    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        return parse_date(inner).map(ClientValue::DateTime);
    }
    let inner = s.strip_prefix("/Guid(")?.strip_suffix(")/")?;
    Uuid::parse_str(inner).ok().map(ClientValue::Guid)
}

/// `y,m,d[,h,mi,s[,ms]]` with a zero-based month, or `epoch-ms[+-hhmm]`.
fn parse_date(inner: &str) -> Option<DateTime<Utc>> {
    if inner.contains(',') {
        let parts = inner
            .split(',')
            .map(|p| p.trim().parse::<i64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if !(3..=7).contains(&parts.len()) {
            return None;
        }
        let part = |i: usize| u32::try_from(parts.get(i).copied().unwrap_or(0)).ok();
        let year = i32::try_from(parts[0]).ok()?;
        let date = NaiveDate::from_ymd_opt(year, part(1)?.checked_add(1)?, part(2)?)?;
        let time = date.and_hms_milli_opt(part(3)?, part(4)?, part(5)?, part(6)?)?;
        return Some(time.and_utc());
    }

    // The offset only affects presentation; the instant is in the millis.
    let digits_end = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map_or(inner.len(), |(i, _)| i);
    let millis = inner[..digits_end].parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_component_date_uses_zero_based_month() {
        let value = ClientValue::from_json(json!("/Date(2024,0,15,10,30,5,250)/"));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(value.as_datetime(), Some(expected));
    }

    #[test]
    fn test_epoch_date_with_offset() {
        let value = ClientValue::from_json(json!("/Date(1700000000000+0100)/"));
        assert_eq!(
            value.as_datetime(),
            DateTime::from_timestamp_millis(1_700_000_000_000)
        );
        let negative = ClientValue::from_json(json!("/Date(-86400000)/"));
        assert_eq!(
            negative.as_datetime(),
            Some(Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_guid_and_plain_strings() {
        let value = ClientValue::from_json(json!("/Guid(9a1e6f0c-7d3b-4d6e-9d3a-3c1b2f0e4a11)/"));
        assert_eq!(
            value.as_guid(),
            Some(Uuid::parse_str("9a1e6f0c-7d3b-4d6e-9d3a-3c1b2f0e4a11").unwrap())
        );
        assert_eq!(
            ClientValue::from_json(json!("/Date(bad)/")).as_str(),
            Some("/Date(bad)/")
        );
    }

    #[test]
    fn test_out_of_range_date_components_stay_strings() {
        let overflow = ClientValue::from_json(json!("/Date(2024,4294967295,1)/"));
        assert_eq!(overflow.as_str(), Some("/Date(2024,4294967295,1)/"));
        assert_eq!(overflow.as_datetime(), None);

        let month = ClientValue::from_json(json!("/Date(2024,12,1)/"));
        assert_eq!(month.as_datetime(), None);
    }

    #[test]
    fn test_collection_helpers() {
        let value = ClientValue::from_json(json!({
            "_ObjectType_": "SP.ListCollection",
            "_Child_Items_": [{"Title": "Documents"}, {"Title": "Tasks"}]
        }));
        assert_eq!(value.object_type(), Some("SP.ListCollection"));
        let items = value.child_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("Title").and_then(ClientValue::as_str), Some("Tasks"));
    }

    #[test]
    fn test_parameter_types() {
        assert_eq!(ClientValue::Int(5).parameter().unwrap().0, "Int32");
        assert_eq!(ClientValue::Int(1 << 40).parameter().unwrap().0, "Int64");
        assert_eq!(ClientValue::Null.parameter().unwrap(), ("Null", None));
        assert_eq!(
            ClientValue::Guid(Uuid::nil()).parameter().unwrap().1.as_deref(),
            Some("{00000000-0000-0000-0000-000000000000}")
        );
        assert_eq!(
            ClientValue::Array(vec![]).parameter(),
            Err(CsomError::UnsupportedParameter("array"))
        );
    }
}
