//! Checkpoint model for resumable sync workflows
//!
//! `table_index` is the index of the next table to process: a checkpoint with
//! `table_index = k` means tables `0..k` are fully done. Within one run the
//! index only grows, since it is advanced after a table's processing returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Last-seen value of an incremental sync's ordering column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub last_id: Option<i64>,
    pub resume_token: Option<String>,
}

impl Cursor {
    pub fn is_empty(&self) -> bool {
        self.last_sync_timestamp.is_none() && self.last_id.is_none() && self.resume_token.is_none()
    }

    /// Combine two cursors keeping the higher watermark of each field
    pub fn merge(&self, other: &Cursor) -> Cursor {
        Cursor {
            last_sync_timestamp: self.last_sync_timestamp.max(other.last_sync_timestamp),
            last_id: self.last_id.max(other.last_id),
            resume_token: other.resume_token.clone().or_else(|| self.resume_token.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub table_index: usize,
    pub synced_tables: Vec<String>,
    pub records_processed: u64,
    pub error_count: usize,
    pub per_table_cursor: BTreeMap<String, Cursor>,
    /// Set when the run that wrote it finished every table
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            table_index: 0,
            synced_tables: Vec::new(),
            records_processed: 0,
            error_count: 0,
            per_table_cursor: BTreeMap::new(),
            completed: false,
            updated_at: Utc::now(),
        }
    }

    /// Where a new run should start given a previously persisted checkpoint
    ///
    /// An interrupted run resumes at its `table_index` with its counters. A
    /// completed run starts over at table 0 and only carries the cursors
    /// forward, so incremental tables continue from their watermark.
    pub fn resume_from(previous: Option<Checkpoint>, workflow_id: &str, run_id: Uuid) -> Self {
        match previous {
            Some(mut checkpoint) if !checkpoint.completed => {
                checkpoint.run_id = run_id;
                checkpoint
            }
            Some(checkpoint) => Checkpoint {
                per_table_cursor: checkpoint.per_table_cursor,
                ..Checkpoint::new(workflow_id, run_id)
            },
            None => Checkpoint::new(workflow_id, run_id),
        }
    }

    pub fn cursor_for(&self, table: &str) -> Option<&Cursor> {
        self.per_table_cursor.get(table)
    }

    /// Account for one table whose processing returned
    pub fn record_table(&mut self, table: &str, records: u64, cursor: Option<Cursor>) {
        self.records_processed += records;
        if !self.synced_tables.iter().any(|t| t == table) {
            self.synced_tables.push(table.to_string());
        }
        if let Some(cursor) = cursor {
            let merged = match self.per_table_cursor.get(table) {
                Some(existing) => existing.merge(&cursor),
                None => cursor,
            };
            self.per_table_cursor.insert(table.to_string(), merged);
        }
    }

    /// Move the resume point forward; never backwards
    pub fn advance_to(&mut self, table_index: usize) {
        self.table_index = self.table_index.max(table_index);
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.updated_at = Utc::now();
    }
}
