//! ETL orchestration core
//!
//! Resumable workflows that discover an external source's structure,
//! synchronize its tables and assess the quality of what was synced.
//!
//! - [`connector`]: the source contract, built-in connectors and the registry
//! - [`discovery`], [`sync`], [`quality`]: the three executors
//! - [`workflow`]: the phased state machine, signals and the runtime
//! - [`store`]: checkpoint, catalog, report, run and record persistence

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod quality;
pub mod store;
pub mod sync;
pub mod types;
pub mod values;
pub mod workflow;

pub use catalog::{CatalogSnapshot, ColumnDescriptor, TableDescriptor};
pub use checkpoint::{Checkpoint, Cursor};
pub use config::EtlConfig;
pub use connector::{ConnectionConfig, Connector, ConnectorRegistry, SourceKind};
pub use error::{ErrorKind, EtlError, EtlResult};
pub use quality::{QualityConfig, QualityReport};
pub use store::Stores;
pub use types::{Phase, SyncMode, WorkflowKind, WorkflowStatus};
pub use workflow::{Signal, WorkflowDeps, WorkflowHandle, WorkflowInput, WorkflowRuntime};
