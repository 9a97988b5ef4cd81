//! Table identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TableError};

/// Identity of a table: `(namespace, name)`.
///
/// Both parts must match `[a-z][a-z0-9_]*` so they can be used verbatim as
/// path segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    namespace: String,
    name: String,
}

impl TableIdent {
    /// Creates a validated table identity.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` if either part is malformed.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        validate_segment("namespace", &namespace)?;
        validate_segment("table name", &name)?;
        Ok(Self { namespace, name })
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TableError::invalid_input(format!(
            "{what} '{value}' must match [a-z][a-z0-9_]*"
        )))
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for TableIdent {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        let (namespace, name) = s.split_once('.').ok_or_else(|| {
            TableError::invalid_input(format!("table identity '{s}' must be namespace.name"))
        })?;
        Self::new(namespace, name)
    }
}
