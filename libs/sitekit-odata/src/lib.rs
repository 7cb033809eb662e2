#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Entity metadata, declarative load specifications and their translation
//! into REST and Graph OData requests.

pub mod filter;
pub mod load;
pub mod metadata;
pub mod request;
pub mod tokens;
pub mod translator;

pub use load::{LoadSpecification, LoadSpecificationBuilder, PropertySelector};
pub use metadata::{EntityMetadata, EntityMetadataBuilder, EntityModel, FieldMapping};
pub use request::{ODataRequest, Protocol};
pub use tokens::TokenValues;
pub use translator::{DEFAULT_GRAPH_ROOT, QueryTranslator, TranslatorOptions};

pub mod ast {
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
    use uuid::Uuid;

    #[derive(Clone, Debug)]
    pub enum Expr {
        And(Box<Expr>, Box<Expr>),
        Or(Box<Expr>, Box<Expr>),
        Not(Box<Expr>),
        Compare(Box<Expr>, CompareOperator, Box<Expr>),
        In(Box<Expr>, Vec<Expr>),
        Function(String, Vec<Expr>),
        Identifier(String),
        Value(Value),
    }

    /// Reference a logical property (or a `/`-separated path through
    /// navigation properties) in a filter.
    ///
    /// ```rust,ignore
    /// let filter = prop("Title").contains("Docs").and(prop("Hidden").eq(false));
    /// ```
    #[must_use]
    pub fn prop(name: impl Into<String>) -> Expr {
        Expr::Identifier(name.into())
    }

    impl Expr {
        /// Combine two expressions with AND: `expr1 and expr2`
        #[must_use]
        pub fn and(self, other: Expr) -> Expr {
            Expr::And(Box::new(self), Box::new(other))
        }

        /// Combine two expressions with OR: `expr1 or expr2`
        #[must_use]
        pub fn or(self, other: Expr) -> Expr {
            Expr::Or(Box::new(self), Box::new(other))
        }

        /// Negate an expression: `not expr`
        #[must_use]
        #[allow(clippy::should_implement_trait)]
        pub fn not(self) -> Expr {
            !self
        }

        fn compare(self, op: CompareOperator, value: impl Into<Value>) -> Expr {
            Expr::Compare(Box::new(self), op, Box::new(Expr::Value(value.into())))
        }

        #[must_use]
        pub fn eq(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Eq, value)
        }

        #[must_use]
        pub fn ne(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Ne, value)
        }

        #[must_use]
        pub fn gt(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Gt, value)
        }

        #[must_use]
        pub fn ge(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Ge, value)
        }

        #[must_use]
        pub fn lt(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Lt, value)
        }

        #[must_use]
        pub fn le(self, value: impl Into<Value>) -> Expr {
            self.compare(CompareOperator::Le, value)
        }

        /// `contains(self, 'value')` (rendered as `substringof` on REST)
        #[must_use]
        pub fn contains(self, value: impl Into<String>) -> Expr {
            self.function("contains", value)
        }

        #[must_use]
        pub fn starts_with(self, value: impl Into<String>) -> Expr {
            self.function("startswith", value)
        }

        #[must_use]
        pub fn ends_with(self, value: impl Into<String>) -> Expr {
            self.function("endswith", value)
        }

        /// `self in (v1, v2, ...)`
        #[must_use]
        pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
            let values = values
                .into_iter()
                .map(|v| Expr::Value(v.into()))
                .collect();
            Expr::In(Box::new(self), values)
        }

        fn function(self, name: &str, value: impl Into<String>) -> Expr {
            Expr::Function(
                name.to_owned(),
                vec![self, Expr::Value(Value::String(value.into()))],
            )
        }
    }

    impl std::ops::Not for Expr {
        type Output = Expr;

        fn not(self) -> Self::Output {
            Expr::Not(Box::new(self))
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum CompareOperator {
        Eq,
        Ne,
        Gt,
        Ge,
        Lt,
        Le,
    }

    #[derive(Clone, Debug)]
    pub enum Value {
        Null,
        Bool(bool),
        Number(BigDecimal),
        Uuid(Uuid),
        DateTime(DateTime<Utc>),
        Date(NaiveDate),
        Time(NaiveTime),
        String(String),
    }

    impl From<bool> for Value {
        fn from(v: bool) -> Self {
            Value::Bool(v)
        }
    }

    impl From<i32> for Value {
        fn from(v: i32) -> Self {
            Value::Number(BigDecimal::from(v))
        }
    }

    impl From<i64> for Value {
        fn from(v: i64) -> Self {
            Value::Number(BigDecimal::from(v))
        }
    }

    impl From<&str> for Value {
        fn from(v: &str) -> Self {
            Value::String(v.to_owned())
        }
    }

    impl From<String> for Value {
        fn from(v: String) -> Self {
            Value::String(v)
        }
    }

    impl From<Uuid> for Value {
        fn from(v: Uuid) -> Self {
            Value::Uuid(v)
        }
    }

    impl From<DateTime<Utc>> for Value {
        fn from(v: DateTime<Utc>) -> Self {
            Value::DateTime(v)
        }
    }

    impl From<NaiveDate> for Value {
        fn from(v: NaiveDate) -> Self {
            Value::Date(v)
        }
    }
}

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }
}

/// Caller misuse detected while translating a load; never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(
        "unsupported expansion: {entity}.{property} needs its own round trip and cannot be loaded at depth {depth}"
    )]
    UnsupportedExpansion {
        entity: &'static str,
        property: String,
        depth: usize,
    },

    #[error("unknown property {entity}.{property}")]
    UnknownProperty {
        entity: &'static str,
        property: String,
    },

    #[error("no protocol can serve {entity}.{property}")]
    NoProtocol {
        entity: &'static str,
        property: String,
    },

    #[error("unresolved token {token} in '{url}'")]
    UnresolvedToken { token: String, url: String },

    #[error("invalid $filter: {0}")]
    InvalidFilter(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
