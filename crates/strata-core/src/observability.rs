//! Observability infrastructure for Strata.
//!
//! Structured logging with consistent spans. Table operations log under a
//! `table` span, scheduler work under a `run` span, so a single commit can be
//! traced from the unit that produced it down to the catalog swap.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name (`json` or `pretty`, any casing).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `strata_table=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for table store operations with standard fields.
///
/// # Example
///
/// ```rust
/// use strata_core::observability::table_span;
///
/// let span = table_span("commit", "raw.yellow_trips");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn table_span(operation: &str, table: &str) -> Span {
    tracing::info_span!("table", op = operation, table = table)
}

/// Creates a span for scheduler work within a run.
#[must_use]
pub fn run_span(operation: &str, run_id: &str) -> Span {
    tracing::info_span!("run", op = operation, run_id = run_id)
}
