//! Scalar values and rows.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::schema::DataType;

/// A single scalar cell.
///
/// `Timestamp` is microseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    /// SQL null.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Long(i64),
    /// 64-bit float. Non-finite values round-trip as strings.
    Double(#[serde(with = "float_repr")] f64),
    /// UTF-8 string.
    String(String),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

/// A positional row conforming to a schema.
pub type Row = Vec<Value>;

impl Value {
    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for a `Double` holding NaN.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Double(d) if d.is_nan())
    }

    /// Returns the data type of a non-null value.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Long(_) => Some(DataType::Long),
            Self::Double(_) => Some(DataType::Double),
            Self::String(_) => Some(DataType::String),
            Self::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Compares two values.
    ///
    /// `Long` and `Double` compare numerically. Returns `None` when either
    /// side is null or NaN, or when the types are incomparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => {
                Some(a.cmp(b))
            }
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Long(a), Self::Double(b)) => cmp_long_double(*a, *b),
            (Self::Double(a), Self::Long(b)) => cmp_long_double(*b, *a).map(Ordering::reverse),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Exact comparison of an integer with a float, without rounding the integer.
fn cmp_long_double(l: i64, d: f64) -> Option<Ordering> {
    // 2^63 is exactly representable; anything at or beyond it is out of range.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if d.is_nan() {
        return None;
    }
    if d >= LIMIT {
        return Some(Ordering::Less);
    }
    if d < -LIMIT {
        return Some(Ordering::Greater);
    }
    let trunc = d.trunc();
    #[allow(clippy::cast_possible_truncation)] // in range and integral after the checks above
    let whole = trunc as i64;
    match l.cmp(&whole) {
        Ordering::Equal => {
            let frac = d - trunc;
            if frac > 0.0 {
                Some(Ordering::Less)
            } else if frac < 0.0 {
                Some(Ordering::Greater)
            } else {
                Some(Ordering::Equal)
            }
        }
        other => Some(other),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Long(l) | Self::Timestamp(l) => write!(f, "{l}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// JSON has no NaN or infinity, so those are written as strings.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_str("NaN")
        } else if v.is_infinite() {
            s.serialize_str(if *v > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            s.serialize_f64(*v)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid float literal '{other}'"
                ))),
            },
        }
    }
}
