//! Structured statements issued by the executors
//!
//! Executors never concatenate SQL by hand. They build a [`Statement`], which
//! SQL sources render with double-quoted identifiers and `$n` placeholders and
//! non-SQL sources evaluate directly.

use serde::{Deserialize, Serialize};

use super::QueryParam;
use crate::etl::catalog::TableDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    fn to_sql(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl From<&TableDescriptor> for TableRef {
    fn from(table: &TableDescriptor) -> Self {
        TableRef::new(table.schema.clone(), table.name.clone())
    }
}

/// `column > after`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorFilter {
    pub column: String,
    pub after: QueryParam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum Statement {
    /// Rows, optionally filtered past a cursor and ordered by a column
    ///
    /// `offset` pages through a bounded read; it is only stable together
    /// with `order_by`.
    SelectRows {
        table: TableRef,
        filter: Option<CursorFilter>,
        order_by: Option<String>,
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },
    /// `total_rows`, `non_null`, `distinct_values` for one column
    ColumnProfile { table: TableRef, column: String },
    /// `value`, `occurrences` for values that appear more than once
    DuplicateValues {
        table: TableRef,
        column: String,
        limit: usize,
    },
    /// `value` for up to `limit` non-null values of a column
    NonNullValues {
        table: TableRef,
        column: String,
        limit: usize,
    },
    /// `max_value` of a column
    MaxValue { table: TableRef, column: String },
    /// `total_rows`, `failed_rows` where `failed_rows` counts rows not satisfying `predicate`
    RuleViolations { table: TableRef, predicate: String },
}

impl Statement {
    pub fn table(&self) -> &TableRef {
        match self {
            Statement::SelectRows { table, .. }
            | Statement::ColumnProfile { table, .. }
            | Statement::DuplicateValues { table, .. }
            | Statement::NonNullValues { table, .. }
            | Statement::MaxValue { table, .. }
            | Statement::RuleViolations { table, .. } => table,
        }
    }

    /// Render as ANSI SQL plus positional parameters
    pub fn to_sql(&self) -> (String, Vec<QueryParam>) {
        match self {
            Statement::SelectRows {
                table,
                filter,
                order_by,
                limit,
                offset,
            } => {
                let mut sql = format!("SELECT * FROM {}", table.to_sql());
                let mut params = Vec::new();
                if let Some(filter) = filter {
                    params.push(filter.after.clone());
                    sql.push_str(&format!(" WHERE {} > ${}", quote_ident(&filter.column), params.len()));
                }
                if let Some(column) = order_by {
                    sql.push_str(&format!(" ORDER BY {}", quote_ident(column)));
                }
                if let Some(limit) = limit {
                    sql.push_str(&format!(" LIMIT {}", limit));
                }
                if let Some(offset) = offset.filter(|o| *o > 0) {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
                (sql, params)
            }
            Statement::ColumnProfile { table, column } => {
                let col = quote_ident(column);
                (
                    format!(
                        "SELECT COUNT(*) AS total_rows, COUNT({col}) AS non_null, \
                         COUNT(DISTINCT {col}) AS distinct_values FROM {}",
                        table.to_sql()
                    ),
                    Vec::new(),
                )
            }
            Statement::DuplicateValues { table, column, limit } => {
                let col = quote_ident(column);
                (
                    format!(
                        "SELECT {col} AS value, COUNT(*) AS occurrences FROM {} \
                         WHERE {col} IS NOT NULL GROUP BY {col} HAVING COUNT(*) > 1 \
                         ORDER BY COUNT(*) DESC LIMIT {limit}",
                        table.to_sql()
                    ),
                    Vec::new(),
                )
            }
            Statement::NonNullValues { table, column, limit } => {
                let col = quote_ident(column);
                (
                    format!(
                        "SELECT {col} AS value FROM {} WHERE {col} IS NOT NULL LIMIT {limit}",
                        table.to_sql()
                    ),
                    Vec::new(),
                )
            }
            Statement::MaxValue { table, column } => (
                format!("SELECT MAX({}) AS max_value FROM {}", quote_ident(column), table.to_sql()),
                Vec::new(),
            ),
            Statement::RuleViolations { table, predicate } => (
                format!(
                    "SELECT COUNT(*) AS total_rows, \
                     COALESCE(SUM(CASE WHEN ({predicate}) THEN 0 ELSE 1 END), 0) AS failed_rows FROM {}",
                    table.to_sql()
                ),
                Vec::new(),
            ),
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_rows_with_cursor() {
        let statement = Statement::SelectRows {
            table: TableRef::new("public", "orders"),
            filter: Some(CursorFilter {
                column: "updated_at".into(),
                after: QueryParam::Text("2026-01-01T00:00:00Z".into()),
            }),
            order_by: Some("updated_at".into()),
            limit: Some(500),
            offset: None,
        };
        let (sql, params) = statement.to_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "public"."orders" WHERE "updated_at" > $1 ORDER BY "updated_at" LIMIT 500"#
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_select_rows_plain() {
        let statement = Statement::SelectRows {
            table: TableRef::new("sales", "line items"),
            filter: None,
            order_by: None,
            limit: None,
            offset: None,
        };
        assert_eq!(statement.to_sql().0, r#"SELECT * FROM "sales"."line items""#);
    }

    #[test]
    fn test_select_rows_page() {
        let statement = Statement::SelectRows {
            table: TableRef::new("public", "orders"),
            filter: None,
            order_by: Some("id".into()),
            limit: Some(100),
            offset: Some(200),
        };
        assert_eq!(
            statement.to_sql().0,
            r#"SELECT * FROM "public"."orders" ORDER BY "id" LIMIT 100 OFFSET 200"#
        );
    }

    #[test]
    fn test_identifier_quoting_escapes_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_column_profile_sql() {
        let (sql, params) = Statement::ColumnProfile {
            table: TableRef::new("public", "users"),
            column: "email".into(),
        }
        .to_sql();
        assert_eq!(
            sql,
            r#"SELECT COUNT(*) AS total_rows, COUNT("email") AS non_null, COUNT(DISTINCT "email") AS distinct_values FROM "public"."users""#
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_rule_violations_sql() {
        let (sql, _) = Statement::RuleViolations {
            table: TableRef::new("public", "orders"),
            predicate: "amount >= 0".into(),
        }
        .to_sql();
        assert!(sql.contains("SUM(CASE WHEN (amount >= 0) THEN 0 ELSE 1 END)"));
        assert!(sql.ends_with(r#"FROM "public"."orders""#));
    }
}
