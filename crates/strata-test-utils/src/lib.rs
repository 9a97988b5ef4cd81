//! Shared test utilities for strata integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording
//! - [`ContendedCatalog`]: A catalog that loses swaps on demand
//! - [`TestContext`]: Pre-configured store over tracing storage
//! - Taxi trip fixtures and executors
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_test_utils::{TestContext, assert_run_succeeded};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let scheduler = ctx.scheduler(graph);
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod catalog;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use catalog::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("strata=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
