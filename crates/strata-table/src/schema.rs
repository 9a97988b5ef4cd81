//! Table schemas.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, TableError};
use crate::value::{Row, Value};

/// Column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Microseconds since the Unix epoch, UTC.
    Timestamp,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique within the schema.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    pub nullable: bool,
}

impl Field {
    /// Creates a nullable column.
    #[must_use]
    pub fn optional(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Creates a non-nullable column.
    #[must_use]
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }
}

/// Ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema, rejecting empty or duplicate column names.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` on an empty schema, an empty name
    /// or a duplicate name.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        if fields.is_empty() {
            return Err(TableError::invalid_input("schema has no columns"));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.is_empty() {
                return Err(TableError::invalid_input("column name is empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(TableError::invalid_input(format!(
                    "duplicate column '{}'",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Returns the columns in order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the position of a column.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks that a row conforms to this schema.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` on wrong arity, a type mismatch,
    /// or a null in a non-nullable column.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.fields.len() {
            return Err(TableError::schema_mismatch(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(row) {
            check_value(field, value)?;
        }
        Ok(())
    }
}

fn check_value(field: &Field, value: &Value) -> Result<()> {
    match value.data_type() {
        None if field.nullable => Ok(()),
        None => Err(TableError::schema_mismatch(format!(
            "null in non-nullable column '{}'",
            field.name
        ))),
        Some(t) if t == field.data_type => Ok(()),
        Some(t) => Err(TableError::schema_mismatch(format!(
            "column '{}' expects {}, got {t}",
            field.name, field.data_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::required("vendor_id", DataType::Long),
            Field::optional("trip_distance", DataType::Double),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Schema::new(vec![
            Field::required("a", DataType::Long),
            Field::optional("a", DataType::String),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::InvalidInput { .. }));
    }

    #[test]
    fn validates_rows() {
        let schema = schema();
        schema
            .validate_row(&vec![Value::Long(1), Value::Null])
            .unwrap();

        let wrong_type = schema.validate_row(&vec![Value::Long(1), Value::from("far")]);
        assert!(matches!(wrong_type, Err(TableError::SchemaMismatch { .. })));

        let null_required = schema.validate_row(&vec![Value::Null, Value::Double(1.0)]);
        assert!(matches!(null_required, Err(TableError::SchemaMismatch { .. })));

        let short = schema.validate_row(&vec![Value::Long(1)]);
        assert!(matches!(short, Err(TableError::SchemaMismatch { .. })));
    }

    #[test]
    fn looks_up_columns() {
        let schema = schema();
        assert_eq!(schema.index_of("trip_distance"), Some(1));
        assert!(schema.field("fare").is_none());
    }
}
