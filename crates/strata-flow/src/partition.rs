//! Asset partitions.
//!
//! A partitioned asset is materialized once per partition key. Keys are
//! opaque strings, except that monthly definitions produce `YYYY-MM` keys
//! which can be mapped back to a timestamp range.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Key of one partition of an asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Creates a key. Keys are non-empty and contain no `/`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPartition` for an empty key or one containing
    /// `/`.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || key.contains('/') {
            return Err(Error::InvalidPartition {
                asset_key: String::new(),
                message: format!("invalid partition key '{key}'"),
            });
        }
        Ok(Self(key))
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a `YYYY-MM` key into the first day of that month.
    #[must_use]
    pub fn month(&self) -> Option<NaiveDate> {
        let (year, month) = self.0.split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
    }

    /// For a `YYYY-MM` key, the half-open range `[start, end)` of timestamps
    /// in that month, in microseconds since the Unix epoch.
    #[must_use]
    pub fn month_range_micros(&self) -> Option<(i64, i64)> {
        let start = self.month()?;
        let end = next_month(start)?;
        Some((micros(start)?, micros(end)?))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn micros(date: NaiveDate) -> Option<i64> {
    let midnight: NaiveDateTime = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().timestamp_micros())
}

/// The partition key space of an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    /// One implicit partition.
    #[default]
    Unpartitioned,
    /// A fixed set of keys, in declaration order.
    Static {
        /// Declared keys.
        keys: Vec<PartitionKey>,
    },
    /// One key per calendar month, `YYYY-MM`, from `start` to `end`
    /// inclusive.
    Monthly {
        /// First month (any day within it).
        start: NaiveDate,
        /// Last month (any day within it).
        end: NaiveDate,
    },
}

impl PartitionsDefinition {
    /// Creates a static definition from string keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPartition` for malformed or repeated keys.
    pub fn static_keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed: Vec<PartitionKey> = Vec::new();
        for key in keys {
            let key = PartitionKey::new(key)?;
            if parsed.contains(&key) {
                return Err(Error::InvalidPartition {
                    asset_key: String::new(),
                    message: format!("duplicate partition key '{key}'"),
                });
            }
            parsed.push(key);
        }
        Ok(Self::Static { keys: parsed })
    }

    /// Creates a monthly definition covering `start` through `end`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPartition` if `end` precedes `start`.
    pub fn monthly(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if (end.year(), end.month()) < (start.year(), start.month()) {
            return Err(Error::InvalidPartition {
                asset_key: String::new(),
                message: format!("monthly range ends ({end}) before it starts ({start})"),
            });
        }
        Ok(Self::Monthly { start, end })
    }

    /// Returns true unless this is `Unpartitioned`.
    #[must_use]
    pub const fn is_partitioned(&self) -> bool {
        !matches!(self, Self::Unpartitioned)
    }

    /// Returns every key in order. Empty for unpartitioned assets.
    #[must_use]
    pub fn keys(&self) -> Vec<PartitionKey> {
        match self {
            Self::Unpartitioned => Vec::new(),
            Self::Static { keys } => keys.clone(),
            Self::Monthly { start, end } => {
                let mut keys = Vec::new();
                let mut cursor = NaiveDate::from_ymd_opt(start.year(), start.month(), 1);
                while let Some(month) = cursor {
                    if (month.year(), month.month()) > (end.year(), end.month()) {
                        break;
                    }
                    keys.push(PartitionKey(format!("{:04}-{:02}", month.year(), month.month())));
                    cursor = next_month(month);
                }
                keys
            }
        }
    }

    /// Returns true if `key` belongs to this definition.
    #[must_use]
    pub fn contains(&self, key: &PartitionKey) -> bool {
        match self {
            Self::Unpartitioned => false,
            Self::Static { keys } => keys.contains(key),
            Self::Monthly { start, end } => key.month().is_some_and(|m| {
                let at = (m.year(), m.month());
                (start.year(), start.month()) <= at && at <= (end.year(), end.month())
            }),
        }
    }
}

/// Which partitions of an asset a run materializes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "keys", rename_all = "snake_case")]
pub enum PartitionSelection {
    /// Every key of the asset's definition.
    #[default]
    All,
    /// Only these keys.
    Keys(Vec<PartitionKey>),
}

impl PartitionSelection {
    /// Selects the given keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPartition` for a malformed key.
    pub fn keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::Keys(
            keys.into_iter()
                .map(PartitionKey::new)
                .collect::<Result<_>>()?,
        ))
    }

    /// Resolves the selection against a definition, preserving the
    /// definition's order and dropping repeats.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPartition` if a selected key is not part of
    /// the definition, or if keys are selected for an unpartitioned asset.
    pub fn resolve(
        &self,
        asset_key: &str,
        definition: &PartitionsDefinition,
    ) -> Result<Vec<PartitionKey>> {
        match self {
            Self::All => Ok(definition.keys()),
            Self::Keys(keys) => {
                if !definition.is_partitioned() {
                    return Err(Error::InvalidPartition {
                        asset_key: asset_key.to_string(),
                        message: "asset is unpartitioned".into(),
                    });
                }
                if let Some(unknown) = keys.iter().find(|k| !definition.contains(k)) {
                    return Err(Error::InvalidPartition {
                        asset_key: asset_key.to_string(),
                        message: format!("unknown partition key '{unknown}'"),
                    });
                }
                Ok(definition
                    .keys()
                    .into_iter()
                    .filter(|k| keys.contains(k))
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_keys_span_year_boundary() {
        let def = PartitionsDefinition::monthly(date(2023, 11, 15), date(2024, 2, 1)).unwrap();
        let keys: Vec<String> = def.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
        assert!(def.contains(&PartitionKey::new("2024-01").unwrap()));
        assert!(!def.contains(&PartitionKey::new("2024-03").unwrap()));
        assert!(!def.contains(&PartitionKey::new("january").unwrap()));
    }

    #[test]
    fn monthly_rejects_reversed_range() {
        assert!(PartitionsDefinition::monthly(date(2024, 2, 1), date(2024, 1, 31)).is_err());
    }

    #[test]
    fn month_range_is_half_open() {
        let key = PartitionKey::new("2024-12").unwrap();
        let (start, end) = key.month_range_micros().unwrap();
        assert_eq!(start, 1_733_011_200_000_000);
        assert_eq!(end, 1_735_689_600_000_000);
        assert!(PartitionKey::new("2024-1").unwrap().month().is_none());
    }

    #[test]
    fn keys_are_validated() {
        assert!(PartitionKey::new("").is_err());
        assert!(PartitionKey::new("a/b").is_err());
        assert!(PartitionsDefinition::static_keys(["us", "us"]).is_err());
    }

    #[test]
    fn selection_resolves_in_definition_order() {
        let def = PartitionsDefinition::static_keys(["us", "eu", "apac"]).unwrap();
        let selection = PartitionSelection::keys(["apac", "us", "us"]).unwrap();
        let keys = selection.resolve("raw.sales", &def).unwrap();
        assert_eq!(keys, vec![PartitionKey::new("us").unwrap(), PartitionKey::new("apac").unwrap()]);

        let unknown = PartitionSelection::keys(["mars"]).unwrap();
        assert!(unknown.resolve("raw.sales", &def).is_err());
        assert!(
            PartitionSelection::keys(["us"])
                .unwrap()
                .resolve("raw.sales", &PartitionsDefinition::Unpartitioned)
                .is_err()
        );
        assert_eq!(PartitionSelection::All.resolve("raw.sales", &def).unwrap().len(), 3);
    }
}
