//! XML serialization of an encoded [`Document`].

use crate::encoder::{Action, Document, ObjectPath};
use crate::error::CsomError;
use crate::model::{Operation, PathSpec};
use crate::value::ClientValue;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

pub const CLIENT_QUERY_NAMESPACE: &str = "http://schemas.microsoft.com/sharepoint/clientquery/2009";
pub const SCHEMA_VERSION: &str = "15.0.0.0";
pub const LIBRARY_VERSION: &str = "16.0.0.0";
pub const DEFAULT_APPLICATION_NAME: &str = "sitekit";

struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    fn write(&mut self, event: Event<'_>) -> Result<(), CsomError> {
        self.inner
            .write_event(event)
            .map_err(|e| CsomError::Xml(e.to_string()))
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), CsomError> {
        self.write(Event::Start(element(name, attrs)))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), CsomError> {
        self.write(Event::Empty(element(name, attrs)))
    }

    fn end(&mut self, name: &str) -> Result<(), CsomError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, text: &str) -> Result<(), CsomError> {
        self.write(Event::Text(BytesText::new(text)))
    }

    fn parameter(&mut self, value: &ClientValue) -> Result<(), CsomError> {
        match value.parameter()? {
            (kind, None) => self.empty("Parameter", &[("Type", kind)]),
            (kind, Some(text)) => {
                self.start("Parameter", &[("Type", kind)])?;
                self.text(&text)?;
                self.end("Parameter")
            }
        }
    }

    fn parameters(&mut self, params: &[ClientValue]) -> Result<(), CsomError> {
        if params.is_empty() {
            return self.empty("Parameters", &[]);
        }
        self.start("Parameters", &[])?;
        for value in params {
            self.parameter(value)?;
        }
        self.end("Parameters")
    }

    fn properties(&mut self, element_name: &str, select: &[String]) -> Result<(), CsomError> {
        let select_all = if select.is_empty() { "true" } else { "false" };
        self.start(element_name, &[("SelectAllProperties", select_all)])?;
        if select.is_empty() {
            self.empty("Properties", &[])?;
        } else {
            self.start("Properties", &[])?;
            for name in select {
                self.empty(
                    "Property",
                    &[("Name", name.as_str()), ("ScalarProperty", "true")],
                )?;
            }
            self.end("Properties")?;
        }
        self.end(element_name)
    }

    fn action(&mut self, action: &Action) -> Result<(), CsomError> {
        let id = action.id.to_string();
        let path_id = action.path_id.to_string();
        match &action.operation {
            Operation::Query {
                select,
                child_items,
            } => {
                self.start("Query", &[("Id", id.as_str()), ("ObjectPathId", path_id.as_str())])?;
                self.properties("Query", select)?;
                if let Some(items) = child_items {
                    self.properties("ChildItemQuery", items)?;
                }
                self.end("Query")
            }
            Operation::Method { name, params } => {
                self.start(
                    "Method",
                    &[("Name", name.as_str()), ("Id", id.as_str()), ("ObjectPathId", path_id.as_str())],
                )?;
                self.parameters(params)?;
                self.end("Method")
            }
            Operation::SetProperty { name, value } => {
                self.start(
                    "SetProperty",
                    &[("Id", id.as_str()), ("ObjectPathId", path_id.as_str()), ("Name", name.as_str())],
                )?;
                self.parameter(value)?;
                self.end("SetProperty")
            }
        }
    }

    fn object_path(&mut self, path: &ObjectPath) -> Result<(), CsomError> {
        let id = path.id.to_string();
        let parent = path.parent.map(|p| p.to_string()).unwrap_or_default();
        match &path.spec {
            PathSpec::Constructor { type_id, params } => {
                self.start("Constructor", &[("Id", id.as_str()), ("TypeId", type_id.as_str())])?;
                self.parameters(params)?;
                self.end("Constructor")
            }
            PathSpec::StaticProperty { type_id, name } => self.empty(
                "StaticProperty",
                &[("Id", id.as_str()), ("TypeId", type_id.as_str()), ("Name", name.as_str())],
            ),
            PathSpec::Identity { name } => self.empty("Identity", &[("Id", id.as_str()), ("Name", name.as_str())]),
            PathSpec::Property { name } => self.empty(
                "Property",
                &[("Id", id.as_str()), ("ParentId", parent.as_str()), ("Name", name.as_str())],
            ),
            PathSpec::Method { name, params } => {
                self.start(
                    "Method",
                    &[("Id", id.as_str()), ("ParentId", parent.as_str()), ("Name", name.as_str())],
                )?;
                self.parameters(params)?;
                self.end("Method")
            }
        }
    }
}

fn element<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for attr in attrs {
        start.push_attribute(*attr);
    }
    start
}

impl Document {
    /// Serialize as a `ProcessQuery` request body.
    ///
    /// # Errors
    /// [`CsomError::UnsupportedParameter`] for unsendable parameter values,
    /// [`CsomError::Xml`] if writing fails.
    pub fn to_xml(&self, application_name: &str) -> Result<String, CsomError> {
        let mut w = XmlWriter {
            inner: Writer::new(Vec::new()),
        };

        w.start(
            "Request",
            &[
                ("xmlns", CLIENT_QUERY_NAMESPACE),
                ("SchemaVersion", SCHEMA_VERSION),
                ("LibraryVersion", LIBRARY_VERSION),
                ("ApplicationName", application_name),
            ],
        )?;

        w.start("Actions", &[])?;
        for action in &self.actions {
            w.action(action)?;
        }
        w.end("Actions")?;

        w.start("ObjectPaths", &[])?;
        for path in &self.paths {
            w.object_path(path)?;
        }
        w.end("ObjectPaths")?;

        w.end("Request")?;

        String::from_utf8(w.inner.into_inner()).map_err(|e| CsomError::Xml(e.to_string()))
    }
}
