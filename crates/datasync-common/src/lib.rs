//! Datasync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the Datasync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`DatasyncError`] and the [`Result`] alias used by
//!   crates that do not need a richer taxonomy
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the single
//!   place where the tracing subscriber is assembled
//!
//! # Example
//!
//! ```no_run
//! use datasync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("logging ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{DatasyncError, Result};
