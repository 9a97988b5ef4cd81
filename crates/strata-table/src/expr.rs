//! Row predicates.
//!
//! Predicates evaluate with three-valued logic: a comparison against null or
//! an incomparable value is unknown, and a row matches only when the
//! predicate is definitely true. Under that logic `Not` can be pushed down to
//! the leaves without changing meaning, which is what the scan planner relies
//! on.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Result, TableError};
use crate::schema::Schema;
use crate::value::{Row, Value};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Returns the operator matching exactly the rows this one rejects
    /// (among comparable values).
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Lt => Self::GtEq,
            Self::LtEq => Self::Gt,
            Self::Gt => Self::LtEq,
            Self::GtEq => Self::Lt,
        }
    }

    /// Tests an ordering of `column` relative to the literal.
    #[must_use]
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        };
        f.write_str(symbol)
    }
}

/// A boolean predicate over a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every row.
    AlwaysTrue,
    /// Matches no row.
    AlwaysFalse,
    /// `column op value`.
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Literal.
        value: Value,
    },
    /// Column is null.
    IsNull {
        /// Column name.
        column: String,
    },
    /// Column is not null.
    NotNull {
        /// Column name.
        column: String,
    },
    /// All children hold. Empty is true.
    And {
        /// Conjuncts.
        children: Vec<Predicate>,
    },
    /// Any child holds. Empty is false.
    Or {
        /// Disjuncts.
        children: Vec<Predicate>,
    },
    /// Child does not hold.
    Not {
        /// Negated predicate.
        child: Box<Predicate>,
    },
}

/// Starts a predicate on a column: `col("distance").gt(30)`.
#[must_use]
pub fn col(name: impl Into<String>) -> Column {
    Column(name.into())
}

/// A column reference used to build predicates.
#[derive(Debug, Clone)]
pub struct Column(String);

impl Column {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            column: self.0,
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    /// `column != value`
    #[must_use]
    pub fn not_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::NotEq, value)
    }

    /// `column < value`
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    /// `column <= value`
    #[must_use]
    pub fn lt_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::LtEq, value)
    }

    /// `column > value`
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    /// `column >= value`
    #[must_use]
    pub fn gt_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::GtEq, value)
    }

    /// `column IS NULL`
    #[must_use]
    pub fn is_null(self) -> Predicate {
        Predicate::IsNull { column: self.0 }
    }

    /// `column IS NOT NULL`
    #[must_use]
    pub fn not_null(self) -> Predicate {
        Predicate::NotNull { column: self.0 }
    }
}

impl Predicate {
    /// Conjunction of `self` and `other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And { mut children } => {
                children.push(other);
                Self::And { children }
            }
            first => Self::And {
                children: vec![first, other],
            },
        }
    }

    /// Disjunction of `self` and `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or { mut children } => {
                children.push(other);
                Self::Or { children }
            }
            first => Self::Or {
                children: vec![first, other],
            },
        }
    }

    /// Negation of `self`.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            child: Box::new(self),
        }
    }

    /// Pushes every `Not` down to the leaves and removes it.
    #[must_use]
    pub fn rewrite_not(self) -> Self {
        match self {
            Self::Not { child } => child.negated(),
            Self::And { children } => Self::And {
                children: children.into_iter().map(Self::rewrite_not).collect(),
            },
            Self::Or { children } => Self::Or {
                children: children.into_iter().map(Self::rewrite_not).collect(),
            },
            leaf => leaf,
        }
    }

    fn negated(self) -> Self {
        match self {
            Self::AlwaysTrue => Self::AlwaysFalse,
            Self::AlwaysFalse => Self::AlwaysTrue,
            Self::Compare { column, op, value } => Self::Compare {
                column,
                op: op.negate(),
                value,
            },
            Self::IsNull { column } => Self::NotNull { column },
            Self::NotNull { column } => Self::IsNull { column },
            Self::And { children } => Self::Or {
                children: children.into_iter().map(Self::negated).collect(),
            },
            Self::Or { children } => Self::And {
                children: children.into_iter().map(Self::negated).collect(),
            },
            Self::Not { child } => child.rewrite_not(),
        }
    }

    /// Returns the referenced column names.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::AlwaysTrue | Self::AlwaysFalse => {}
            Self::Compare { column, .. } | Self::IsNull { column } | Self::NotNull { column } => {
                out.insert(column.as_str());
            }
            Self::And { children } | Self::Or { children } => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Self::Not { child } => child.collect_columns(out),
        }
    }

    /// Checks that every referenced column exists in `schema`.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` naming the first unknown column.
    pub fn bind(&self, schema: &Schema) -> Result<()> {
        match self.columns().into_iter().find(|c| schema.field(c).is_none()) {
            Some(unknown) => Err(TableError::invalid_input(format!(
                "predicate references unknown column '{unknown}'"
            ))),
            None => Ok(()),
        }
    }

    /// Evaluates against a row: `Some(true)`, `Some(false)` or unknown.
    /// Unknown columns evaluate as null.
    #[must_use]
    pub fn eval(&self, schema: &Schema, row: &Row) -> Option<bool> {
        match self {
            Self::AlwaysTrue => Some(true),
            Self::AlwaysFalse => Some(false),
            Self::Compare { column, op, value } => value_of(schema, row, column)
                .compare(value)
                .map(|o| op.matches(o)),
            Self::IsNull { column } => Some(value_of(schema, row, column).is_null()),
            Self::NotNull { column } => Some(!value_of(schema, row, column).is_null()),
            Self::And { children } => {
                let mut result = Some(true);
                for child in children {
                    match child.eval(schema, row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Self::Or { children } => {
                let mut result = Some(false);
                for child in children {
                    match child.eval(schema, row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Self::Not { child } => child.eval(schema, row).map(|b| !b),
        }
    }

    /// Returns true if the row definitely matches.
    #[must_use]
    pub fn matches(&self, schema: &Schema, row: &Row) -> bool {
        self.eval(schema, row) == Some(true)
    }
}

static NULL: Value = Value::Null;

fn value_of<'r>(schema: &Schema, row: &'r Row, column: &str) -> &'r Value {
    schema
        .index_of(column)
        .and_then(|i| row.get(i))
        .unwrap_or(&NULL)
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[Self], sep: &str| {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        };
        match self {
            Self::AlwaysTrue => write!(f, "true"),
            Self::AlwaysFalse => write!(f, "false"),
            Self::Compare { column, op, value } => write!(f, "{column} {op} {value}"),
            Self::IsNull { column } => write!(f, "{column} IS NULL"),
            Self::NotNull { column } => write!(f, "{column} IS NOT NULL"),
            Self::And { children } => join(f, children, "AND"),
            Self::Or { children } => join(f, children, "OR"),
            Self::Not { child } => write!(f, "NOT {child}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::optional("distance", DataType::Double),
            Field::optional("zone", DataType::String),
        ])
        .unwrap()
    }

    #[test]
    fn three_valued_evaluation() {
        let schema = schema();
        let row = vec![Value::Null, Value::from("jfk")];

        let p = col("distance").gt(3);
        assert_eq!(p.eval(&schema, &row), None);
        assert_eq!(p.clone().negate().eval(&schema, &row), None);

        let either = p.clone().or(col("zone").eq("jfk"));
        assert_eq!(either.eval(&schema, &row), Some(true));

        let both = p.and(col("zone").eq("jfk"));
        assert_eq!(both.eval(&schema, &row), None);
        assert!(!both.matches(&schema, &row));
    }

    #[test]
    fn rewrite_not_is_equivalent() {
        let schema = schema();
        let p = col("distance")
            .lt(10.0)
            .or(col("zone").is_null())
            .and(col("distance").not_eq(4.0).negate())
            .negate();
        let rewritten = p.clone().rewrite_not();
        assert!(!format!("{rewritten}").contains("NOT"));

        let rows = vec![
            vec![Value::Double(4.0), Value::Null],
            vec![Value::Double(12.0), Value::from("a")],
            vec![Value::Null, Value::Null],
            vec![Value::Double(f64::NAN), Value::from("b")],
        ];
        for row in &rows {
            assert_eq!(p.eval(&schema, row), rewritten.eval(&schema, row), "{row:?}");
        }
    }

    #[test]
    fn bind_rejects_unknown_columns() {
        let schema = schema();
        assert!(col("distance").gt(1).bind(&schema).is_ok());
        assert!(col("fare").gt(1).bind(&schema).is_err());
    }

    #[test]
    fn empty_connectives() {
        let schema = schema();
        let row = vec![Value::Null, Value::Null];
        let and = Predicate::And { children: vec![] };
        let or = Predicate::Or { children: vec![] };
        assert_eq!(and.eval(&schema, &row), Some(true));
        assert_eq!(or.eval(&schema, &row), Some(false));
    }
}
