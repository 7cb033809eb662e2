//! Placeholder tokens in endpoint templates (`{Site.Id}`, `{hostname}`, ...).

use crate::Error;
use std::collections::BTreeMap;

/// Values substituted into endpoint templates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenValues {
    values: BTreeMap<String, String>,
}

impl TokenValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token value; `name` is given without braces
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Substitute every known token in `template`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedToken`] naming the first `{...}` placeholder
    /// that has no value.
    pub fn resolve(&self, template: &str) -> Result<String, Error> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = &after[..end];
            match self.values.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(Error::UnresolvedToken {
                        token: format!("{{{name}}}"),
                        url: template.to_owned(),
                    });
                }
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TokenValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
