//! Object path graph construction.
//!
//! Requests sharing a prefix share its object paths: roots are matched by
//! their constructor or static arguments, members by parent, name and
//! arguments. Paths and actions draw ids from one counter, so every id is
//! unique in the document and defined before it is referenced.

use crate::error::CsomError;
use crate::model::{CsomRequest, Operation, PathSpec};
use crate::value::ClientValue;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPath {
    pub id: u32,
    pub parent: Option<u32>,
    pub spec: PathSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: u32,
    /// Object path the operation targets
    pub path_id: u32,
    pub operation: Operation,
    /// Index of the originating request
    pub request: usize,
    /// Path ids from the root to the target
    pub chain: Vec<u32>,
}

impl Action {
    /// Whether this action's chain passes through `path_id`
    #[must_use]
    pub fn depends_on_path(&self, path_id: u32) -> bool {
        self.chain.contains(&path_id)
    }
}

/// Encoded object graph of one request document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Object paths in creation order
    pub paths: Vec<ObjectPath>,
    /// Actions in submission order
    pub actions: Vec<Action>,
}

impl Document {
    #[must_use]
    pub fn action(&self, id: u32) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn path(&self, id: u32) -> Option<&ObjectPath> {
        self.paths.iter().find(|p| p.id == id)
    }
}

/// Builds a [`Document`] request by request.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    next_id: u32,
    document: Document,
}

impl DocumentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one request and return the id of its action.
    ///
    /// # Errors
    /// [`CsomError::InvalidPath`] for chains that are empty, do not start at a
    /// root or restart mid-way; [`CsomError::UnsupportedParameter`] for
    /// parameters that cannot be sent.
    pub fn add(&mut self, request: &CsomRequest) -> Result<u32, CsomError> {
        validate(request)?;

        let mut chain = Vec::with_capacity(request.chain.len());
        let mut parent = None;
        for spec in &request.chain {
            let id = self.path(parent, spec);
            chain.push(id);
            parent = Some(id);
        }
        let Some(&path_id) = chain.last() else {
            return Err(CsomError::InvalidPath("empty chain".to_owned()));
        };

        let id = self.next_id();
        let request_index = self.document.actions.len();
        self.document.actions.push(Action {
            id,
            path_id,
            operation: request.operation.clone(),
            request: request_index,
            chain,
        });
        Ok(id)
    }

    #[must_use]
    pub fn build(self) -> Document {
        tracing::debug!(
            paths = self.document.paths.len(),
            actions = self.document.actions.len(),
            "built CSOM document"
        );
        self.document
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn path(&mut self, parent: Option<u32>, spec: &PathSpec) -> u32 {
        if let Some(existing) = self
            .document
            .paths
            .iter()
            .find(|p| p.parent == parent && p.spec == *spec)
        {
            return existing.id;
        }
        let id = self.next_id();
        self.document.paths.push(ObjectPath {
            id,
            parent,
            spec: spec.clone(),
        });
        id
    }
}

/// Encode `requests` into one document; action `i` belongs to request `i`.
///
/// # Errors
/// See [`DocumentBuilder::add`].
pub fn encode(requests: &[CsomRequest]) -> Result<Document, CsomError> {
    let mut builder = DocumentBuilder::new();
    for request in requests {
        builder.add(request)?;
    }
    Ok(builder.build())
}

fn validate(request: &CsomRequest) -> Result<(), CsomError> {
    let Some(root) = request.chain.first() else {
        return Err(CsomError::InvalidPath("empty chain".to_owned()));
    };
    if !root.is_root() {
        return Err(CsomError::InvalidPath(format!(
            "{} cannot start a chain",
            root.element_name()
        )));
    }
    if let Some(spec) = request.chain.iter().skip(1).find(|s| s.is_root()) {
        return Err(CsomError::InvalidPath(format!(
            "{} can only start a chain",
            spec.element_name()
        )));
    }

    let path_params = request.chain.iter().flat_map(|spec| match spec {
        PathSpec::Constructor { params, .. } | PathSpec::Method { params, .. } => params.as_slice(),
        _ => [].as_slice(),
    });
    let op_params: &[ClientValue] = match &request.operation {
        Operation::Method { params, .. } => params,
        Operation::SetProperty { value, .. } => std::slice::from_ref(value),
        Operation::Query { .. } => &[],
    };
    for value in path_params.chain(op_params) {
        value.parameter()?;
    }
    Ok(())
}
