//! `$filter` rendering per protocol dialect.
//!
//! Identifiers are logical property names (or `/`-separated paths through
//! navigation properties) and are renamed to wire names with the same
//! metadata used for `$select`.

use crate::ast::{CompareOperator, Expr, Value};
use crate::metadata::EntityMetadata;
use crate::request::Protocol;
use crate::Error;
use chrono::SecondsFormat;

/// Check that every identifier in `expr` names a known property and that the
/// expression has a renderable shape.
///
/// # Errors
/// [`Error::UnknownProperty`] for unknown identifiers, [`Error::InvalidFilter`]
/// for malformed expressions.
pub fn validate(expr: &Expr, meta: &EntityMetadata) -> Result<(), Error> {
    match expr {
        Expr::And(left, right) | Expr::Or(left, right) => {
            validate(left, meta)?;
            validate(right, meta)
        }
        Expr::Not(inner) => validate(inner, meta),
        Expr::Compare(left, _, right) => {
            let (name, _) = field_and_value(left, right)?;
            resolve_path(meta, name)
        }
        Expr::In(left, values) => {
            let Expr::Identifier(name) = &**left else {
                return Err(Error::InvalidFilter(
                    "'in' needs a property on the left".to_owned(),
                ));
            };
            if values.iter().any(|v| !matches!(v, Expr::Value(_))) {
                return Err(Error::InvalidFilter(
                    "'in' accepts only literal values".to_owned(),
                ));
            }
            resolve_path(meta, name)
        }
        Expr::Function(name, args) => {
            let (field, _) = function_args(name, args)?;
            resolve_path(meta, field)
        }
        Expr::Identifier(_) | Expr::Value(_) => Err(Error::InvalidFilter(
            "filter must be a boolean expression".to_owned(),
        )),
    }
}

/// Render `expr` in the dialect of `protocol`.
///
/// # Errors
/// [`Error::NoProtocol`] when a referenced property has no wire name on
/// `protocol`; the errors of [`validate`] otherwise.
pub fn render(expr: &Expr, meta: &EntityMetadata, protocol: Protocol) -> Result<String, Error> {
    match expr {
        Expr::And(left, right) => render_logical(expr, left, right, "and", meta, protocol),
        Expr::Or(left, right) => render_logical(expr, left, right, "or", meta, protocol),
        Expr::Not(inner) => Ok(format!("not ({})", render(inner, meta, protocol)?)),
        Expr::Compare(left, op, right) => {
            let (name, value) = field_and_value(left, right)?;
            let field = mapped_path(meta, name, protocol)?;
            Ok(format!(
                "{field} {} {}",
                operator(*op),
                literal(value, protocol)
            ))
        }
        Expr::In(left, values) => {
            let Expr::Identifier(name) = &**left else {
                return Err(Error::InvalidFilter(
                    "'in' needs a property on the left".to_owned(),
                ));
            };
            let field = mapped_path(meta, name, protocol)?;
            let values = values
                .iter()
                .map(|v| match v {
                    Expr::Value(value) => Ok(literal(value, protocol)),
                    _ => Err(Error::InvalidFilter(
                        "'in' accepts only literal values".to_owned(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{field} in ({})", values.join(",")))
        }
        Expr::Function(name, args) => {
            let (path, needle) = function_args(name, args)?;
            let field = mapped_path(meta, path, protocol)?;
            let needle = quote(needle);
            let func = name.to_ascii_lowercase();
            Ok(match (func.as_str(), protocol) {
                ("contains", Protocol::Rest) => format!("substringof({needle},{field})"),
                _ => format!("{func}({field},{needle})"),
            })
        }
        Expr::Identifier(_) | Expr::Value(_) => Err(Error::InvalidFilter(
            "filter must be a boolean expression".to_owned(),
        )),
    }
}

/// Wire path of a logical property path on `protocol`, `None` when some
/// segment is not served there.
///
/// # Errors
/// [`Error::UnknownProperty`] for unknown segments, [`Error::InvalidFilter`]
/// when a path continues past a non-navigation property.
pub fn wire_path(
    meta: &EntityMetadata,
    path: &str,
    protocol: Protocol,
) -> Result<Option<String>, Error> {
    let mut current = meta;
    let mut parts = Vec::new();
    let mut segments = path.split('/').peekable();

    while let Some(segment) = segments.next() {
        let field = current
            .field(segment)
            .ok_or_else(|| Error::UnknownProperty {
                entity: current.type_name,
                property: segment.to_owned(),
            })?;
        let Some(wire) = field.wire_name(protocol) else {
            return Ok(None);
        };
        parts.push(wire);
        if segments.peek().is_some() {
            current = field.target_metadata().ok_or_else(|| {
                Error::InvalidFilter(format!("{segment} is not a navigation property"))
            })?;
        }
    }

    Ok(Some(parts.join("/")))
}

/// Check that a logical property path exists, regardless of protocol.
///
/// # Errors
/// Same as [`wire_path`].
pub fn resolve_path(meta: &EntityMetadata, path: &str) -> Result<(), Error> {
    let mut current = meta;
    let mut segments = path.split('/').peekable();
    while let Some(segment) = segments.next() {
        let field = current
            .field(segment)
            .ok_or_else(|| Error::UnknownProperty {
                entity: current.type_name,
                property: segment.to_owned(),
            })?;
        if segments.peek().is_some() {
            current = field.target_metadata().ok_or_else(|| {
                Error::InvalidFilter(format!("{segment} is not a navigation property"))
            })?;
        }
    }
    Ok(())
}

/// Like [`wire_path`], failing when the path is not served on `protocol`.
///
/// # Errors
/// [`Error::NoProtocol`] for unserved paths; the errors of [`wire_path`].
pub fn mapped_path(
    meta: &EntityMetadata,
    path: &str,
    protocol: Protocol,
) -> Result<String, Error> {
    wire_path(meta, path, protocol)?.ok_or_else(|| Error::NoProtocol {
        entity: meta.type_name,
        property: path.to_owned(),
    })
}

fn render_logical(
    parent: &Expr,
    left: &Expr,
    right: &Expr,
    keyword: &str,
    meta: &EntityMetadata,
    protocol: Protocol,
) -> Result<String, Error> {
    let side = |child: &Expr| -> Result<String, Error> {
        let rendered = render(child, meta, protocol)?;
        let mixed = matches!(
            (parent, child),
            (Expr::And(..), Expr::Or(..)) | (Expr::Or(..), Expr::And(..))
        );
        Ok(if mixed { format!("({rendered})") } else { rendered })
    };
    Ok(format!("{} {keyword} {}", side(left)?, side(right)?))
}

fn field_and_value<'a>(left: &'a Expr, right: &'a Expr) -> Result<(&'a str, &'a Value), Error> {
    match (left, right) {
        (Expr::Identifier(name), Expr::Value(value)) => Ok((name, value)),
        (Expr::Identifier(_), Expr::Identifier(_)) => Err(Error::InvalidFilter(
            "comparing two properties is not supported".to_owned(),
        )),
        _ => Err(Error::InvalidFilter(
            "comparison must be between a property and a value".to_owned(),
        )),
    }
}

fn function_args<'a>(name: &str, args: &'a [Expr]) -> Result<(&'a str, &'a str), Error> {
    let func = name.to_ascii_lowercase();
    if !matches!(func.as_str(), "contains" | "startswith" | "endswith") {
        return Err(Error::InvalidFilter(format!("unsupported function '{name}'")));
    }
    match args {
        [Expr::Identifier(field), Expr::Value(Value::String(needle))] => Ok((field, needle)),
        _ => Err(Error::InvalidFilter(format!(
            "'{name}' expects a property and a string"
        ))),
    }
}

fn operator(op: CompareOperator) -> &'static str {
    match op {
        CompareOperator::Eq => "eq",
        CompareOperator::Ne => "ne",
        CompareOperator::Gt => "gt",
        CompareOperator::Ge => "ge",
        CompareOperator::Lt => "lt",
        CompareOperator::Le => "le",
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn literal(value: &Value, protocol: Protocol) -> String {
    let rest = protocol == Protocol::Rest;
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Uuid(id) if rest => format!("guid'{id}'"),
        Value::Uuid(id) => id.to_string(),
        Value::DateTime(ts) => {
            let ts = ts.to_rfc3339_opts(SecondsFormat::Secs, true);
            if rest { format!("datetime'{ts}'") } else { ts }
        }
        Value::Date(d) if rest => format!("datetime'{d}T00:00:00Z'"),
        Value::Date(d) => d.to_string(),
        Value::Time(t) if rest => format!("time'{}'", t.format("%H:%M:%S")),
        Value::Time(t) => t.format("%H:%M:%S").to_string(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::ast::prop;
    use crate::metadata::FieldMapping;
    use chrono::{TimeZone, Utc};
    use std::sync::LazyLock;
    use uuid::Uuid;

    static LIST: LazyLock<EntityMetadata> = LazyLock::new(|| {
        EntityMetadata::builder("List")
            .field(FieldMapping::new("Title").rest("Title").graph("displayName"))
            .field(FieldMapping::new("Created").both("createdDateTime"))
            .field(FieldMapping::new("TemplateId").rest("BaseTemplate"))
            .field(FieldMapping::new("Owner").both("owner").expand(user))
            .build()
    });

    static USER: LazyLock<EntityMetadata> = LazyLock::new(|| {
        EntityMetadata::builder("User")
            .field(FieldMapping::new("Email").rest("Email").graph("mail"))
            .build()
    });

    fn user() -> &'static EntityMetadata {
        &USER
    }

    #[test]
    fn test_contains_per_dialect() {
        let expr = prop("Title").contains("Q3 'plan'");
        assert_eq!(
            render(&expr, &LIST, Protocol::Rest).unwrap(),
            "substringof('Q3 ''plan''',Title)"
        );
        assert_eq!(
            render(&expr, &LIST, Protocol::Graph).unwrap(),
            "contains(displayName,'Q3 ''plan''')"
        );
    }

    #[test]
    fn test_guid_and_datetime_literals() {
        let id = Uuid::nil();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let expr = prop("Id").eq(id).and(prop("Created").ge(ts));
        assert_eq!(
            render(&expr, &LIST, Protocol::Rest).unwrap(),
            "Id eq guid'00000000-0000-0000-0000-000000000000' and createdDateTime ge datetime'2024-05-01T08:30:00Z'"
        );
        assert_eq!(
            render(&expr, &LIST, Protocol::Graph).unwrap(),
            "id eq 00000000-0000-0000-0000-000000000000 and createdDateTime ge 2024-05-01T08:30:00Z"
        );
    }

    #[test]
    fn test_mixed_logical_operators_are_grouped() {
        let expr = prop("Title")
            .eq("a")
            .or(prop("Title").eq("b"))
            .and(!prop("Title").starts_with("_"));
        assert_eq!(
            render(&expr, &LIST, Protocol::Graph).unwrap(),
            "(displayName eq 'a' or displayName eq 'b') and not (startswith(displayName,'_'))"
        );
    }

    #[test]
    fn test_navigation_path_is_renamed() {
        let expr = prop("Owner/Email").is_in(["a@x", "b@x"]);
        assert_eq!(
            render(&expr, &LIST, Protocol::Graph).unwrap(),
            "owner/mail in ('a@x','b@x')"
        );
    }

    #[test]
    fn test_unmapped_field_has_no_protocol() {
        let expr = prop("TemplateId").eq(100);
        assert_eq!(
            render(&expr, &LIST, Protocol::Rest).unwrap(),
            "BaseTemplate eq 100"
        );
        assert!(matches!(
            render(&expr, &LIST, Protocol::Graph),
            Err(Error::NoProtocol { property, .. }) if property == "TemplateId"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_and_malformed() {
        assert!(matches!(
            validate(&prop("Nope").eq(1), &LIST),
            Err(Error::UnknownProperty { entity: "List", .. })
        ));
        assert!(matches!(
            validate(&prop("Title"), &LIST),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            validate(&Expr::Function("length".to_owned(), vec![prop("Title")]), &LIST),
            Err(Error::InvalidFilter(_))
        ));
        assert!(validate(&prop("Owner/Email").ends_with("@x"), &LIST).is_ok());
    }
}
