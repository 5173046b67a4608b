//! Column statistics over a bounded row sample

use serde_json::Value;
use std::collections::HashSet;

use crate::etl::catalog::{is_numeric_type, is_text_type, ColumnDescriptor, ColumnStatistics};
use crate::etl::connector::Row;
use crate::etl::values::{compare_values, value_key};

/// Distinct sample values retained per column
pub const MAX_SAMPLE_VALUES: usize = 10;

/// Statistics and distinct sample values for one column
pub fn column_statistics(column: &ColumnDescriptor, rows: &[Row]) -> (ColumnStatistics, Vec<Value>) {
    let mut stats = ColumnStatistics::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut samples: Vec<Value> = Vec::new();
    let mut total_length = 0usize;
    let mut text_values = 0usize;

    let numeric = is_numeric_type(&column.data_type);
    let text = is_text_type(&column.data_type);

    for row in rows {
        let value = match row.get(&column.name) {
            Some(value) if !value.is_null() => value,
            _ => {
                stats.null_count += 1;
                continue;
            }
        };
        if seen.insert(value_key(value)) && samples.len() < MAX_SAMPLE_VALUES {
            samples.push(value.clone());
        }
        if numeric {
            if stats.min.as_ref().map_or(true, |min| compare_values(value, min).is_some_and(|o| o.is_lt())) {
                stats.min = Some(value.clone());
            }
            if stats.max.as_ref().map_or(true, |max| compare_values(value, max).is_some_and(|o| o.is_gt())) {
                stats.max = Some(value.clone());
            }
        }
        if text {
            if let Value::String(s) = value {
                total_length += s.chars().count();
                text_values += 1;
            }
        }
    }

    stats.unique_count = seen.len() as u64;
    if text && text_values > 0 {
        stats.avg_length = Some(total_length as f64 / text_values as f64);
    }
    (stats, samples)
}

/// Fill every column's statistics and samples from `rows`
pub fn apply_sample_statistics(columns: &mut [ColumnDescriptor], rows: &[Row]) {
    for column in columns.iter_mut() {
        let (stats, samples) = column_statistics(column, rows);
        column.statistics = Some(stats);
        column.sample_values = samples;
    }
}
