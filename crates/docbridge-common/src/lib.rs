//! Docbridge Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the docbridge workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BridgeError`] and the [`Result`] alias used by
//!   configuration and catalog loading
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the one
//!   place the global `tracing` subscriber is installed
//!
//! # Example
//!
//! ```no_run
//! use docbridge_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{BridgeError, Result};
