//! Incremental cursor selection and high-water-mark tracking
//!
//! [`infer_incremental_column`] is a pure function over a column list so the
//! heuristic can be tested without a connector. [`CursorTracker`] follows the
//! maximum cursor value seen while rows stream past, independent of batch
//! boundaries.

use chrono::{DateTime, Utc};

use crate::etl::catalog::{is_numeric_type, is_temporal_type, is_timestamp_type, ColumnDescriptor};
use crate::etl::checkpoint::Cursor;
use crate::etl::connector::{CursorFilter, QueryParam, Row};
use crate::etl::values::{parse_id, parse_timestamp};

/// Column names tried first, in order, for a timestamp cursor
pub const PRIORITY_CURSOR_NAMES: &[&str] = &[
    "updated_at",
    "modified_at",
    "last_modified",
    "timestamp",
    "created_at",
    "inserted_at",
    "date_modified",
    "last_updated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Timestamp,
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorColumn {
    pub name: String,
    pub kind: CursorKind,
}

impl CursorColumn {
    fn for_column(column: &ColumnDescriptor) -> Self {
        let kind = if is_temporal_type(&column.data_type) {
            CursorKind::Timestamp
        } else {
            CursorKind::Id
        };
        Self {
            name: column.name.clone(),
            kind,
        }
    }

    /// `column > watermark` for a previously persisted cursor
    ///
    /// `None` when the cursor holds no watermark of this column's kind, which
    /// means the whole table is read.
    pub fn filter_after(&self, previous: Option<&Cursor>) -> Option<CursorFilter> {
        let previous = previous?;
        let after = match self.kind {
            CursorKind::Timestamp => QueryParam::Timestamp(previous.last_sync_timestamp?),
            CursorKind::Id => QueryParam::Int(previous.last_id?),
        };
        Some(CursorFilter {
            column: self.name.clone(),
            after,
        })
    }
}

/// Pick the monotonic column an incremental sync filters and orders by
///
/// 1. a priority name (case-insensitive) with a date or timestamp type,
/// 2. any date or timestamp column,
/// 3. a numeric primary-key column whose name contains `id` or equals `pk`.
pub fn infer_incremental_column(columns: &[ColumnDescriptor]) -> Option<CursorColumn> {
    // Time-of-day columns do not order rows across days
    let temporal = |c: &&ColumnDescriptor| is_timestamp_type(&c.data_type);

    for candidate in PRIORITY_CURSOR_NAMES {
        if let Some(column) = columns
            .iter()
            .filter(temporal)
            .find(|c| c.name.eq_ignore_ascii_case(candidate))
        {
            return Some(CursorColumn::for_column(column));
        }
    }

    if let Some(column) = columns.iter().find(temporal) {
        return Some(CursorColumn::for_column(column));
    }

    columns
        .iter()
        .find(|c| {
            let name = c.name.to_lowercase();
            c.primary_key && is_numeric_type(&c.data_type) && (name.contains("id") || name == "pk")
        })
        .map(|c| CursorColumn {
            name: c.name.clone(),
            kind: CursorKind::Id,
        })
}

/// Resolve the cursor for one table, honoring an explicit override
///
/// An override naming a column the table does not have is ignored in favour
/// of the heuristic.
pub fn resolve_cursor_column(columns: &[ColumnDescriptor], override_column: Option<&str>) -> Option<CursorColumn> {
    if let Some(name) = override_column {
        if let Some(column) = columns.iter().find(|c| c.name == name) {
            return Some(CursorColumn::for_column(column));
        }
        tracing::warn!(column = %name, "configured cursor column not found, using heuristic");
    }
    infer_incremental_column(columns)
}

/// Tracks the maximum cursor value observed during a read
pub struct CursorTracker {
    column: CursorColumn,
    max_timestamp: Option<DateTime<Utc>>,
    max_id: Option<i64>,
}

impl CursorTracker {
    pub fn new(column: CursorColumn) -> Self {
        Self {
            column,
            max_timestamp: None,
            max_id: None,
        }
    }

    pub fn column(&self) -> &CursorColumn {
        &self.column
    }

    /// Record one row; rows without a parsable cursor value are ignored
    pub fn observe(&mut self, row: &Row) {
        let Some(value) = row.get(&self.column.name) else {
            return;
        };
        match self.column.kind {
            CursorKind::Timestamp => {
                if let Some(ts) = parse_timestamp(value) {
                    self.max_timestamp = self.max_timestamp.max(Some(ts));
                }
            }
            CursorKind::Id => {
                if let Some(id) = parse_id(value) {
                    self.max_id = self.max_id.max(Some(id));
                }
            }
        }
    }

    /// Consume the tracker into the cursor to persist
    ///
    /// Merged with the previous cursor so a run that saw no new rows keeps
    /// the old watermark.
    pub fn finish(self, previous: Option<&Cursor>) -> Cursor {
        let observed = Cursor {
            last_sync_timestamp: self.max_timestamp,
            last_id: self.max_id,
            resume_token: None,
        };
        match previous {
            Some(previous) => previous.merge(&observed),
            None => observed,
        }
    }
}
