//! Declarative description of what to load for one entity.

use crate::SortDir;
use crate::ast::Expr;

/// One element of a [`LoadSpecification`].
#[derive(Clone, Debug)]
pub enum PropertySelector {
    /// Scalar or complex property by logical name
    Simple(String),
    /// Navigation property with the shape to load for the related entity
    Expand(String, LoadSpecification),
    Filter(Expr),
    OrderBy(String, SortDir),
    Skip(u64),
    Top(u64),
}

/// Ordered, immutable set of property selectors plus an optional
/// continuation token from a previous page.
///
/// ```rust,ignore
/// let spec = LoadSpecification::builder()
///     .select("Title")
///     .expand("Lists", |lists| lists.select("Title").top(10))
///     .filter(prop("Hidden").eq(false))
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct LoadSpecification {
    selectors: Vec<PropertySelector>,
    continuation: Option<String>,
}

impl LoadSpecification {
    #[must_use]
    pub fn builder() -> LoadSpecificationBuilder {
        LoadSpecificationBuilder::default()
    }

    #[must_use]
    pub fn selectors(&self) -> &[PropertySelector] {
        &self.selectors
    }

    #[must_use]
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// True when no property was selected or expanded explicitly
    #[must_use]
    pub fn has_no_projection(&self) -> bool {
        !self.selectors.iter().any(|s| {
            matches!(
                s,
                PropertySelector::Simple(_) | PropertySelector::Expand(..)
            )
        })
    }

    /// True when the specification carries filter, ordering or paging options
    #[must_use]
    pub fn has_query_options(&self) -> bool {
        self.selectors.iter().any(|s| {
            matches!(
                s,
                PropertySelector::Filter(_)
                    | PropertySelector::OrderBy(..)
                    | PropertySelector::Skip(_)
                    | PropertySelector::Top(_)
            )
        }) || self.continuation.is_some()
    }

    /// Copy keeping only the selectors accepted by `keep`
    #[must_use]
    pub fn retain(&self, keep: impl Fn(&PropertySelector) -> bool) -> LoadSpecification {
        LoadSpecification {
            selectors: self.selectors.iter().filter(|s| keep(s)).cloned().collect(),
            continuation: self.continuation.clone(),
        }
    }

    /// Combined filter; several filters are joined with `and`
    #[must_use]
    pub fn filter(&self) -> Option<Expr> {
        self.selectors
            .iter()
            .filter_map(|s| match s {
                PropertySelector::Filter(expr) => Some(expr.clone()),
                _ => None,
            })
            .reduce(Expr::and)
    }

    pub fn order_by(&self) -> impl Iterator<Item = (&str, SortDir)> {
        self.selectors.iter().filter_map(|s| match s {
            PropertySelector::OrderBy(name, dir) => Some((name.as_str(), *dir)),
            _ => None,
        })
    }

    #[must_use]
    pub fn skip(&self) -> Option<u64> {
        self.selectors.iter().rev().find_map(|s| match s {
            PropertySelector::Skip(n) => Some(*n),
            _ => None,
        })
    }

    #[must_use]
    pub fn top(&self) -> Option<u64> {
        self.selectors.iter().rev().find_map(|s| match s {
            PropertySelector::Top(n) => Some(*n),
            _ => None,
        })
    }
}

/// Builder for [`LoadSpecification`].
///
/// Selecting or expanding the same property twice keeps the first occurrence;
/// `skip` and `top` keep the last value given.
#[derive(Default)]
#[must_use]
pub struct LoadSpecificationBuilder {
    selectors: Vec<PropertySelector>,
    continuation: Option<String>,
}

impl LoadSpecificationBuilder {
    pub fn select(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.is_projected(&name) {
            self.selectors.push(PropertySelector::Simple(name));
        }
        self
    }

    /// Select several properties at once
    pub fn select_all<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, Self::select)
    }

    /// Expand a navigation property, shaping the related entity with `nested`
    pub fn expand<F>(self, name: impl Into<String>, nested: F) -> Self
    where
        F: FnOnce(LoadSpecificationBuilder) -> LoadSpecificationBuilder,
    {
        self.expand_with(name, nested(LoadSpecificationBuilder::default()).build())
    }

    pub fn expand_with(mut self, name: impl Into<String>, nested: LoadSpecification) -> Self {
        let name = name.into();
        if !self.is_projected(&name) {
            self.selectors.push(PropertySelector::Expand(name, nested));
        }
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.selectors.push(PropertySelector::Filter(expr));
        self
    }

    pub fn order_by(mut self, name: impl Into<String>, dir: SortDir) -> Self {
        self.selectors.push(PropertySelector::OrderBy(name.into(), dir));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.selectors.retain(|s| !matches!(s, PropertySelector::Skip(_)));
        self.selectors.push(PropertySelector::Skip(n));
        self
    }

    pub fn top(mut self, n: u64) -> Self {
        self.selectors.retain(|s| !matches!(s, PropertySelector::Top(_)));
        self.selectors.push(PropertySelector::Top(n));
        self
    }

    /// Continue from the token returned with a previous page
    pub fn continuation(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }

    #[must_use]
    pub fn build(self) -> LoadSpecification {
        LoadSpecification {
            selectors: self.selectors,
            continuation: self.continuation,
        }
    }

    fn is_projected(&self, name: &str) -> bool {
        self.selectors.iter().any(|s| match s {
            PropertySelector::Simple(n) | PropertySelector::Expand(n, _) => n == name,
            _ => false,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::ast::prop;

    #[test]
    fn test_duplicate_selects_collapse() {
        let spec = LoadSpecification::builder()
            .select("Title")
            .select("Title")
            .expand("Title", |n| n.select("Id"))
            .build();
        assert_eq!(spec.selectors().len(), 1);
        assert!(matches!(&spec.selectors()[0], PropertySelector::Simple(n) if n == "Title"));
    }

    #[test]
    fn test_filters_are_and_combined() {
        let spec = LoadSpecification::builder()
            .filter(prop("A").eq(1))
            .filter(prop("B").eq(2))
            .build();
        assert!(matches!(spec.filter(), Some(Expr::And(..))));
        assert!(spec.has_query_options());
        assert!(spec.has_no_projection());
    }

    #[test]
    fn test_paging_keeps_last_value() {
        let spec = LoadSpecification::builder().top(5).top(10).skip(3).build();
        assert_eq!(spec.top(), Some(10));
        assert_eq!(spec.skip(), Some(3));
        assert_eq!(spec.selectors().len(), 2);
    }

    #[test]
    fn test_expand_builds_nested_spec() {
        let spec = LoadSpecification::builder()
            .expand("Lists", |lists| lists.select("Title").order_by("Title", SortDir::Desc))
            .build();
        let PropertySelector::Expand(name, nested) = &spec.selectors()[0] else {
            panic!("expected expand");
        };
        assert_eq!(name, "Lists");
        assert_eq!(nested.order_by().collect::<Vec<_>>(), vec![("Title", SortDir::Desc)]);
        assert!(!spec.has_query_options());
    }
}
