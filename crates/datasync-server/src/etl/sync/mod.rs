//! Table synchronization under full, incremental and snapshot modes

pub mod cursor;
pub mod executor;

pub use cursor::{infer_incremental_column, CursorColumn, CursorKind, CursorTracker};
pub use executor::{BatchError, SyncExecutor, SyncRequest, SyncResult};
