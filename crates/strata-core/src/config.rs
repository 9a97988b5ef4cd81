//! Runtime configuration.
//!
//! Settings have sensible defaults and can be overridden from the
//! environment (`STRATA_*` variables). Crate-specific configs in
//! `strata-table` and `strata-flow` are derived from [`StrataConfig`].

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Default object-store prefix for table data and metadata.
pub const DEFAULT_WAREHOUSE: &str = "warehouse";
/// Default object-store prefix for catalog pointers.
pub const DEFAULT_CATALOG_PREFIX: &str = "_catalog";
/// Default object-store prefix for scheduler records.
pub const DEFAULT_FLOW_PREFIX: &str = "_flow";
/// Default bound on commit attempts (first try plus rebases).
pub const DEFAULT_COMMIT_MAX_ATTEMPTS: u32 = 4;
/// Default number of units executing concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
/// Default rows per data file when draining a row source.
pub const DEFAULT_TARGET_FILE_ROWS: usize = 500;

/// Top-level Strata configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrataConfig {
    /// Prefix under which table directories live.
    pub warehouse: String,
    /// Prefix under which catalog pointers live.
    pub catalog_prefix: String,
    /// Prefix under which scheduler records live.
    pub flow_prefix: String,
    /// Maximum commit attempts per unit before failing.
    pub commit_max_attempts: u32,
    /// Maximum units executing concurrently.
    pub max_concurrency: usize,
    /// Rows per data file (one sub-chunk of a unit's output).
    pub target_file_rows: usize,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            warehouse: DEFAULT_WAREHOUSE.to_string(),
            catalog_prefix: DEFAULT_CATALOG_PREFIX.to_string(),
            flow_prefix: DEFAULT_FLOW_PREFIX.to_string(),
            commit_max_attempts: DEFAULT_COMMIT_MAX_ATTEMPTS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            target_file_rows: DEFAULT_TARGET_FILE_ROWS,
            log_format: LogFormat::default(),
        }
    }
}

impl StrataConfig {
    /// Loads configuration from `STRATA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is set but malformed, or
    /// if the resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`StrataConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let mut config = Self::default();

        if let Some(warehouse) = vars.string("STRATA_WAREHOUSE") {
            config.warehouse = warehouse;
        }
        if let Some(prefix) = vars.string("STRATA_CATALOG_PREFIX") {
            config.catalog_prefix = prefix;
        }
        if let Some(prefix) = vars.string("STRATA_FLOW_PREFIX") {
            config.flow_prefix = prefix;
        }
        if let Some(attempts) = vars.u32("STRATA_COMMIT_MAX_ATTEMPTS")? {
            config.commit_max_attempts = attempts;
        }
        if let Some(concurrency) = vars.usize("STRATA_MAX_CONCURRENCY")? {
            config.max_concurrency = concurrency;
        }
        if let Some(rows) = vars.usize("STRATA_TARGET_FILE_ROWS")? {
            config.target_file_rows = rows;
        }
        if let Some(format) = vars.string("STRATA_LOG_FORMAT") {
            config.log_format = LogFormat::parse(&format).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "STRATA_LOG_FORMAT must be one of: json, pretty (got {format})"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for empty prefixes, overlapping
    /// prefixes, or zero-valued limits.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("warehouse", &self.warehouse),
            ("catalog_prefix", &self.catalog_prefix),
            ("flow_prefix", &self.flow_prefix),
        ] {
            if value.trim().is_empty() || value.ends_with('/') {
                return Err(Error::InvalidInput(format!(
                    "{name} must be non-empty and must not end with '/'"
                )));
            }
        }
        if self.warehouse == self.catalog_prefix || self.warehouse == self.flow_prefix {
            return Err(Error::InvalidInput(
                "warehouse prefix must differ from catalog and flow prefixes".to_string(),
            ));
        }
        if self.commit_max_attempts == 0 {
            return Err(Error::InvalidInput(
                "commit_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.target_file_rows == 0 {
            return Err(Error::InvalidInput(
                "target_file_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }
}
