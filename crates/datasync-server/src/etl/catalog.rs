//! Catalog model produced by discovery
//!
//! A [`CatalogSnapshot`] is the full picture of one connection's databases,
//! schemas, tables, columns and relationships at the time of a discovery run.
//! It is immutable once produced and replaced wholesale on the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::connector::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableType {
    #[default]
    Table,
    View,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub null_count: u64,
    pub unique_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub avg_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ColumnStatistics>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            sample_values: Vec::new(),
            statistics: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ForeignKey,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub target_schema: String,
    pub target_table: String,
    pub column_pairs: Vec<ColumnPair>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyCandidate {
    pub columns: Vec<String>,
    pub confidence: f64,
    /// Backed by a declared constraint rather than a uniqueness probe
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub database: String,
    pub schema: String,
    pub name: String,
    #[serde(rename = "type")]
    pub table_type: TableType,
    pub last_modified: Option<DateTime<Utc>>,
    pub row_count: Option<u64>,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub primary_key_candidates: Vec<PrimaryKeyCandidate>,
    #[serde(default)]
    pub relationships: Vec<RelationshipCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_rows: Vec<Row>,
}

impl TableDescriptor {
    pub fn new(database: impl Into<String>, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
            table_type: TableType::Table,
            last_modified: None,
            row_count: None,
            columns: Vec::new(),
            primary_key_candidates: Vec::new(),
            relationships: Vec::new(),
            sample_rows: Vec::new(),
        }
    }

    /// `schema.table`, the key used for cursors and sink partitions
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `database.schema.table`, used in error log entries
    pub fn object_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Key columns used for idempotent writes and uniqueness checks
    ///
    /// Declared primary-key columns win; otherwise the highest-confidence
    /// inferred candidate; otherwise none.
    pub fn key_columns(&self) -> Vec<String> {
        let declared: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        self.primary_key_candidates
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|c| c.columns.clone())
            .unwrap_or_default()
    }
}

/// A connection's discovered catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub connection_id: Uuid,
    pub discovered_at: DateTime<Utc>,
    pub databases: Vec<String>,
    /// `(database, schema)` pairs that were walked
    pub schemas: Vec<SchemaRef>,
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub database: String,
    pub name: String,
}

impl CatalogSnapshot {
    pub fn empty(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            discovered_at: Utc::now(),
            databases: Vec::new(),
            schemas: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.tables.iter().map(|t| t.relationships.len()).sum()
    }
}

// ============================================================================
// Declared type families
// ============================================================================

fn normalized(data_type: &str) -> String {
    data_type.trim().to_lowercase()
}

/// timestamp, timestamptz, datetime, date, time, ...
pub fn is_temporal_type(data_type: &str) -> bool {
    let t = normalized(data_type);
    t.starts_with("timestamp") || t.starts_with("datetime") || t == "date" || t.starts_with("time")
}

/// True for date and timestamp types, whose values order chronologically
pub fn is_timestamp_type(data_type: &str) -> bool {
    let t = normalized(data_type);
    is_temporal_type(&t) && !(t == "time" || t.starts_with("time ") || t == "timetz")
}

/// int, integer, bigint, smallint, serial families
pub fn is_integer_type(data_type: &str) -> bool {
    let t = normalized(data_type);
    matches!(
        t.as_str(),
        "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "bigint" | "tinyint" | "mediumint"
            | "serial" | "serial4" | "serial8" | "smallserial" | "bigserial"
    )
}

pub fn is_numeric_type(data_type: &str) -> bool {
    let t = normalized(data_type);
    is_integer_type(&t)
        || t.starts_with("numeric")
        || t.starts_with("decimal")
        || t.starts_with("float")
        || t.starts_with("double")
        || t == "real"
        || t == "money"
        || t == "number"
}

pub fn is_text_type(data_type: &str) -> bool {
    let t = normalized(data_type);
    t == "text"
        || t.starts_with("char")
        || t.starts_with("varchar")
        || t.starts_with("character")
        || t.starts_with("nvarchar")
        || t == "string"
        || t == "citext"
}
