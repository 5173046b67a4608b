//! Primary-key and relationship inference
//!
//! Pure functions over catalog entries; the uniqueness probes that feed them
//! are issued by the discovery executor.

use std::collections::BTreeMap;

use crate::etl::catalog::{
    is_integer_type, ColumnDescriptor, ColumnPair, PrimaryKeyCandidate, RelationshipCandidate, RelationshipType,
    TableDescriptor,
};
use crate::etl::connector::ForeignKey;

const UNIQUE_BASE_CONFIDENCE: f64 = 0.8;
const KEY_NAME_BONUS: f64 = 0.1;
const INTEGER_TYPE_BONUS: f64 = 0.05;
const MAX_INFERRED_CONFIDENCE: f64 = 0.95;
const EXPLICIT_CONFIDENCE: f64 = 1.0;
const INFERRED_RELATIONSHIP_CONFIDENCE: f64 = 0.7;

fn is_key_like_name(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("id") || name.contains("key") || name == "pk"
}

/// Confidence for a column that passed the uniqueness probe
pub fn score_primary_key_candidate(name: &str, data_type: &str) -> f64 {
    let mut confidence = UNIQUE_BASE_CONFIDENCE;
    if is_key_like_name(name) {
        confidence += KEY_NAME_BONUS;
    }
    if is_integer_type(data_type) {
        confidence += INTEGER_TYPE_BONUS;
    }
    confidence.min(MAX_INFERRED_CONFIDENCE)
}

/// Key candidates for a table
///
/// Declared key columns form one composite candidate at 1.0. Without a
/// declared key, every column in `unique_columns` becomes its own candidate,
/// sorted by descending confidence.
pub fn primary_key_candidates(columns: &[ColumnDescriptor], unique_columns: &[String]) -> Vec<PrimaryKeyCandidate> {
    let declared: Vec<String> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if !declared.is_empty() {
        return vec![PrimaryKeyCandidate {
            columns: declared,
            confidence: EXPLICIT_CONFIDENCE,
            explicit: true,
        }];
    }

    let mut inferred: Vec<PrimaryKeyCandidate> = columns
        .iter()
        .filter(|c| unique_columns.contains(&c.name))
        .map(|c| PrimaryKeyCandidate {
            columns: vec![c.name.clone()],
            confidence: score_primary_key_candidate(&c.name, &c.data_type),
            explicit: false,
        })
        .collect();
    inferred.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    inferred
}

/// Stem naming the referenced table, from `customer_id`, `customer_key`,
/// `customer_ref` or `ref_customer`
pub fn reference_stem(column: &str) -> Option<String> {
    let name = column.to_lowercase();
    let stem = if let Some(stem) = name.strip_suffix("_id") {
        stem.to_string()
    } else if let Some(stem) = name.strip_suffix("_key") {
        stem.to_string()
    } else if name.contains("ref") {
        name.replacen("ref", "", 1).trim_matches('_').to_string()
    } else {
        return None;
    };
    (stem.len() >= 2).then_some(stem)
}

/// Column of `table` that a reference would point at
fn key_like_target(table: &TableDescriptor) -> Option<&ColumnDescriptor> {
    let declared: Vec<&ColumnDescriptor> = table.columns.iter().filter(|c| c.primary_key).collect();
    if let [single] = declared.as_slice() {
        return Some(single);
    }
    table
        .columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case("id"))
        .or_else(|| table.columns.iter().find(|c| c.name.to_lowercase().ends_with("_id")))
}

/// Declared constraints on `table`, one candidate per constraint
pub fn explicit_relationships(table: &TableDescriptor, foreign_keys: &[ForeignKey]) -> Vec<RelationshipCandidate> {
    let mut by_constraint: BTreeMap<&str, RelationshipCandidate> = BTreeMap::new();
    for fk in foreign_keys
        .iter()
        .filter(|fk| fk.schema == table.schema && fk.table == table.name)
    {
        by_constraint
            .entry(fk.constraint_name.as_str())
            .or_insert_with(|| RelationshipCandidate {
                relationship_type: RelationshipType::ForeignKey,
                target_schema: fk.target_schema.clone(),
                target_table: fk.target_table.clone(),
                column_pairs: Vec::new(),
                confidence: EXPLICIT_CONFIDENCE,
            })
            .column_pairs
            .push(ColumnPair {
                source: fk.column.clone(),
                target: fk.target_column.clone(),
            });
    }
    by_constraint.into_values().collect()
}

/// Relationships of `table`: declared ones first, then name-based guesses
/// for columns no declared constraint covers
pub fn infer_relationships(
    table: &TableDescriptor,
    catalog: &[TableDescriptor],
    foreign_keys: &[ForeignKey],
) -> Vec<RelationshipCandidate> {
    let mut relationships = explicit_relationships(table, foreign_keys);
    let covered: Vec<String> = relationships
        .iter()
        .flat_map(|r| r.column_pairs.iter().map(|p| p.source.clone()))
        .collect();

    for column in table.columns.iter().filter(|c| !covered.contains(&c.name)) {
        let Some(stem) = reference_stem(&column.name) else {
            continue;
        };
        for target in catalog {
            let target_name = target.name.to_lowercase();
            if !(target_name.contains(&stem) || stem.contains(&target_name)) {
                continue;
            }
            let Some(target_column) = key_like_target(target) else {
                continue;
            };
            let same_table = target.schema == table.schema && target.name == table.name;
            if same_table && target_column.name == column.name {
                continue;
            }
            relationships.push(RelationshipCandidate {
                relationship_type: RelationshipType::Inferred,
                target_schema: target.schema.clone(),
                target_table: target.name.clone(),
                column_pairs: vec![ColumnPair {
                    source: column.name.clone(),
                    target: target_column.name.clone(),
                }],
                confidence: INFERRED_RELATIONSHIP_CONFIDENCE,
            });
        }
    }
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: Vec<ColumnDescriptor>) -> TableDescriptor {
        let mut table = TableDescriptor::new("shop", "public", name);
        table.columns = columns;
        table
    }

    #[test]
    fn test_primary_key_scoring() {
        assert_eq!(score_primary_key_candidate("order_id", "integer"), 0.95);
        assert_eq!(score_primary_key_candidate("notes", "text"), 0.8);
        assert!((score_primary_key_candidate("sku_key", "text") - 0.9).abs() < 1e-9);
        assert!((score_primary_key_candidate("seq", "bigint") - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_declared_key_is_one_composite_candidate() {
        let columns = vec![
            ColumnDescriptor::new("order_id", "integer").primary_key(),
            ColumnDescriptor::new("line_no", "integer").primary_key(),
            ColumnDescriptor::new("sku", "text"),
        ];
        let candidates = primary_key_candidates(&columns, &["sku".to_string()]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns, vec!["order_id", "line_no"]);
        assert_eq!(candidates[0].confidence, 1.0);
        assert!(candidates[0].explicit);
    }

    #[test]
    fn test_inferred_candidates_sorted_by_confidence() {
        let columns = vec![
            ColumnDescriptor::new("notes", "text"),
            ColumnDescriptor::new("order_id", "integer"),
            ColumnDescriptor::new("amount", "numeric"),
        ];
        let candidates = primary_key_candidates(&columns, &["notes".to_string(), "order_id".to_string()]);
        let names: Vec<_> = candidates.iter().map(|c| c.columns[0].as_str()).collect();
        assert_eq!(names, vec!["order_id", "notes"]);
        assert!(candidates.iter().all(|c| !c.explicit));
    }

    #[test]
    fn test_reference_stem() {
        assert_eq!(reference_stem("customer_id").as_deref(), Some("customer"));
        assert_eq!(reference_stem("Region_Key").as_deref(), Some("region"));
        assert_eq!(reference_stem("ref_product").as_deref(), Some("product"));
        assert_eq!(reference_stem("id"), None);
        assert_eq!(reference_stem("notes"), None);
    }

    #[test]
    fn test_inferred_relationship_by_name() {
        let customers = table(
            "customers",
            vec![
                ColumnDescriptor::new("id", "integer").primary_key(),
                ColumnDescriptor::new("name", "text"),
            ],
        );
        let orders = table(
            "orders",
            vec![
                ColumnDescriptor::new("id", "integer").primary_key(),
                ColumnDescriptor::new("customer_id", "integer"),
            ],
        );
        let catalog = vec![customers, orders.clone()];

        let relationships = infer_relationships(&orders, &catalog, &[]);
        assert_eq!(relationships.len(), 1);
        let rel = &relationships[0];
        assert_eq!(rel.relationship_type, RelationshipType::Inferred);
        assert_eq!(rel.target_table, "customers");
        assert_eq!(rel.column_pairs[0].source, "customer_id");
        assert_eq!(rel.column_pairs[0].target, "id");
        assert_eq!(rel.confidence, 0.7);
    }

    #[test]
    fn test_explicit_foreign_key_takes_precedence() {
        let customers = table("customers", vec![ColumnDescriptor::new("id", "integer").primary_key()]);
        let orders = table(
            "orders",
            vec![
                ColumnDescriptor::new("id", "integer").primary_key(),
                ColumnDescriptor::new("customer_id", "integer"),
            ],
        );
        let fk = ForeignKey {
            constraint_name: "orders_customer_fk".into(),
            schema: "public".into(),
            table: "orders".into(),
            column: "customer_id".into(),
            target_schema: "public".into(),
            target_table: "customers".into(),
            target_column: "id".into(),
        };
        let catalog = vec![customers, orders.clone()];

        let relationships = infer_relationships(&orders, &catalog, &[fk]);
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].relationship_type, RelationshipType::ForeignKey);
        assert_eq!(relationships[0].confidence, 1.0);
    }
}
