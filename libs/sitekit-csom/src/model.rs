//! Logical CSOM requests: an object path chain plus one operation on its target.

use crate::value::ClientValue;

/// Type id of `Microsoft.SharePoint.Client.RequestContext`
pub const REQUEST_CONTEXT_TYPE_ID: &str = "{3747adcd-a3c3-41b9-bfab-4a64dd2f1e0a}";

/// One hop of an object path chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSpec {
    Constructor {
        type_id: String,
        params: Vec<ClientValue>,
    },
    StaticProperty {
        type_id: String,
        name: String,
    },
    /// Object addressed by its server identity string
    Identity {
        name: String,
    },
    Property {
        name: String,
    },
    Method {
        name: String,
        params: Vec<ClientValue>,
    },
}

impl PathSpec {
    /// Whether the element can start a chain
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(
            self,
            PathSpec::Constructor { .. } | PathSpec::StaticProperty { .. } | PathSpec::Identity { .. }
        )
    }

    #[must_use]
    pub fn element_name(&self) -> &'static str {
        match self {
            PathSpec::Constructor { .. } => "Constructor",
            PathSpec::StaticProperty { .. } => "StaticProperty",
            PathSpec::Identity { .. } => "Identity",
            PathSpec::Property { .. } => "Property",
            PathSpec::Method { .. } => "Method",
        }
    }
}

/// What to do with the object at the end of the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Load scalar properties; an empty `select` loads all of them.
    /// `child_items` also loads the members of a collection.
    Query {
        select: Vec<String>,
        child_items: Option<Vec<String>>,
    },
    Method {
        name: String,
        params: Vec<ClientValue>,
    },
    SetProperty {
        name: String,
        value: ClientValue,
    },
}

impl Operation {
    #[must_use]
    pub fn element_name(&self) -> &'static str {
        match self {
            Operation::Query { .. } => "Query",
            Operation::Method { .. } => "Method",
            Operation::SetProperty { .. } => "SetProperty",
        }
    }

    /// Whether the server answers the action with a payload after its id
    #[must_use]
    pub fn returns_value(&self) -> bool {
        !matches!(self, Operation::SetProperty { .. })
    }
}

/// One logical CSOM request.
#[derive(Debug, Clone, PartialEq)]
pub struct CsomRequest {
    pub chain: Vec<PathSpec>,
    pub operation: Operation,
}

impl CsomRequest {
    /// Start a chain at `RequestContext.Current`
    #[must_use]
    pub fn context() -> PathBuilder {
        PathBuilder::static_property(REQUEST_CONTEXT_TYPE_ID, "Current")
    }

    /// Start a chain at the current site
    #[must_use]
    pub fn site() -> PathBuilder {
        Self::context().property("Site")
    }

    /// Start a chain at the current web
    #[must_use]
    pub fn web() -> PathBuilder {
        Self::context().property("Web")
    }
}

/// Fluent construction of a [`CsomRequest`].
///
/// ```rust,ignore
/// let request = CsomRequest::web()
///     .method("GetList", ["/sites/dev/Shared Documents"])
///     .query(["Title", "ItemCount"]);
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct PathBuilder {
    chain: Vec<PathSpec>,
}

impl PathBuilder {
    pub fn constructor<V: Into<ClientValue>>(
        type_id: impl Into<String>,
        params: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            chain: vec![PathSpec::Constructor {
                type_id: type_id.into(),
                params: params.into_iter().map(Into::into).collect(),
            }],
        }
    }

    pub fn static_property(type_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            chain: vec![PathSpec::StaticProperty {
                type_id: type_id.into(),
                name: name.into(),
            }],
        }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            chain: vec![PathSpec::Identity { name: name.into() }],
        }
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.chain.push(PathSpec::Property { name: name.into() });
        self
    }

    pub fn method<V: Into<ClientValue>>(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = V>,
    ) -> Self {
        self.chain.push(PathSpec::Method {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Load the named scalar properties of the target
    pub fn query<S: Into<String>>(self, select: impl IntoIterator<Item = S>) -> CsomRequest {
        self.finish(Operation::Query {
            select: select.into_iter().map(Into::into).collect(),
            child_items: None,
        })
    }

    /// Load a collection with the named properties of each member
    pub fn query_items<S: Into<String>>(self, select: impl IntoIterator<Item = S>) -> CsomRequest {
        self.finish(Operation::Query {
            select: Vec::new(),
            child_items: Some(select.into_iter().map(Into::into).collect()),
        })
    }

    pub fn call<V: Into<ClientValue>>(
        self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = V>,
    ) -> CsomRequest {
        self.finish(Operation::Method {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        })
    }

    pub fn set_property(self, name: impl Into<String>, value: impl Into<ClientValue>) -> CsomRequest {
        self.finish(Operation::SetProperty {
            name: name.into(),
            value: value.into(),
        })
    }

    fn finish(self, operation: Operation) -> CsomRequest {
        CsomRequest {
            chain: self.chain,
            operation,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chains_members() {
        let request = CsomRequest::web()
            .method("GetList", ["/sites/dev/Lists/Tasks"])
            .query(["Title"]);
        assert_eq!(request.chain.len(), 3);
        assert!(request.chain[0].is_root());
        assert_eq!(request.chain[1], PathSpec::Property { name: "Web".to_owned() });
        assert_eq!(request.chain[2].element_name(), "Method");
        assert_eq!(request.operation.element_name(), "Query");
    }

    #[test]
    fn test_set_property_operation() {
        let request = CsomRequest::web().set_property("Title", "Team site");
        assert_eq!(
            request.operation,
            Operation::SetProperty {
                name: "Title".to_owned(),
                value: ClientValue::String("Team site".to_owned()),
            }
        );
    }
}
