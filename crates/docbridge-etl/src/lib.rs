//! Docbridge ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves loyalty event records between a document store and a relational
//! store.
//!
//! # Overview
//!
//! - **Extraction** (`docbridge extract`): every collection named in the
//!   [`catalog`] is streamed in pages, projected to its mapped fields,
//!   coerced to the column types and bulk loaded into a table of the same
//!   name
//! - **Import** (`docbridge import`): staged rows holding one JSON payload
//!   each are turned back into documents, one collection per entity type,
//!   with retries that resume at the page that failed
//!
//! Both directions talk to their stores through small traits
//! ([`DocumentSource`], [`RelationalSink`], [`RowSource`], [`DocumentSink`])
//! with MongoDB and PostgreSQL implementations in [`stores`] plus in-memory
//! ones for tests and dry runs.

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod error;
pub mod extract;
pub mod import;
pub mod progress;
pub mod projector;
pub mod retry;
pub mod sink;
pub mod source;
pub mod stores;
pub mod summary;
pub mod value;

// Re-export commonly used types
pub use catalog::{Catalog, EntityMapping, FieldMapping, SourcePath, TargetType};
pub use cli::{Cli, Commands};
pub use config::EtlConfig;
pub use error::{EtlError, Result};
pub use extract::{ExtractOptions, Extractor};
pub use import::{DocumentSink, ImportOptions, Importer, RowSource};
pub use sink::RelationalSink;
pub use source::DocumentSource;
pub use summary::{EntityReport, EntityStatus, RunSummary};
pub use value::SourceValue;
