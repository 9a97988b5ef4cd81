//! # strata-core
//!
//! Core abstractions shared by the Strata table store and scheduler.
//!
//! This crate provides the foundational types and traits used across all Strata components:
//!
//! - **Storage**: The blob-store contract (write-once puts, conditional writes, listing)
//!   and an in-memory backend
//! - **Identifiers**: Strongly-typed ULID identifiers for runs and data files
//! - **Configuration**: Environment-driven settings with validation
//! - **Observability**: Logging initialization and standard span constructors
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `strata-core` knows nothing about tables or assets. Higher crates
//! (`strata-table`, `strata-flow`) build on the storage contract defined here.
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let run = RunId::generate();
//! let backend = MemoryBackend::new();
//! # let _ = (run, backend);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::StrataConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::{FileId, RunId};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use config::StrataConfig;
pub use error::{Error, Result};
pub use id::{FileId, RunId};
pub use observability::{LogFormat, init_logging};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
