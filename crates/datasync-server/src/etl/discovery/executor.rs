//! The discovery walk
//!
//! databases → schemas → tables → columns → samples and statistics → key and
//! relationship inference. Every connector call runs as an activity. A failed
//! object is reported to the [`UnitObserver`] and its siblings continue; only
//! failing to list databases at all ends the walk.

use chrono::Utc;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::inference::{infer_relationships, primary_key_candidates};
use super::statistics::apply_sample_statistics;
use super::{DiscoveryOptions, UnitObserver, UnitOutcome};
use crate::etl::catalog::{CatalogSnapshot, ColumnDescriptor, SchemaRef, TableDescriptor};
use crate::etl::connector::{ColumnInfo, Connector, ForeignKey, Statement, TableInfo, TableRef};
use crate::etl::error::EtlResult;
use crate::etl::workflow::activity::{run_activity, ActivityOptions};

impl From<TableInfo> for TableDescriptor {
    fn from(info: TableInfo) -> Self {
        let mut table = TableDescriptor::new(info.database, info.schema, info.name);
        table.table_type = info.table_type;
        table.last_modified = info.last_modified;
        table.row_count = info.row_count;
        table
    }
}

impl From<ColumnInfo> for ColumnDescriptor {
    fn from(info: ColumnInfo) -> Self {
        let mut column = ColumnDescriptor::new(info.name, info.data_type);
        column.nullable = info.nullable;
        column.primary_key = info.primary_key;
        column
    }
}

pub struct DiscoveryExecutor {
    activity: ActivityOptions,
    cancel: CancellationToken,
    max_sample_rows: usize,
}

impl DiscoveryExecutor {
    pub fn new(activity: ActivityOptions, cancel: CancellationToken, max_sample_rows: usize) -> Self {
        Self {
            activity,
            cancel,
            max_sample_rows,
        }
    }

    async fn call<T, F, Fut>(&self, name: &str, op: F) -> EtlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EtlResult<T>>,
    {
        run_activity(name, &self.activity, &self.cancel, op).await
    }

    pub async fn discover(
        &self,
        connector: &dyn Connector,
        connection_id: Uuid,
        options: &DiscoveryOptions,
        observer: &dyn UnitObserver,
    ) -> EtlResult<CatalogSnapshot> {
        let mut snapshot = CatalogSnapshot::empty(connection_id);
        let mut foreign_keys: Vec<ForeignKey> = Vec::new();

        let databases = self.call("list databases", || connector.list_databases()).await?;
        snapshot.databases = databases
            .into_iter()
            .filter(|db| options.wants_database(db))
            .collect();

        for database in &snapshot.databases {
            observer.before_unit(database).await?;
            let schemas = match self
                .call("list schemas", || connector.list_schemas(Some(database.as_str())))
                .await
            {
                Ok(schemas) => schemas,
                Err(err) => {
                    observer.unit_failed(database, &err).await?;
                    continue;
                }
            };

            for schema in schemas.into_iter().filter(|s| options.wants_schema(s)) {
                let object = format!("{}.{}", database, schema);
                observer.before_unit(&object).await?;
                match self
                    .call("list tables", || connector.list_tables(Some(database.as_str()), Some(schema.as_str())))
                    .await
                {
                    Ok(tables) => {
                        debug!(schema = %object, tables = tables.len(), "listed tables");
                        snapshot.tables.extend(tables.into_iter().map(TableDescriptor::from));
                    }
                    Err(err) => observer.unit_failed(&object, &err).await?,
                }
                snapshot.schemas.push(SchemaRef {
                    database: database.clone(),
                    name: schema,
                });
            }

            if options.infer_relationships {
                let object = format!("{}:foreign_keys", database);
                match self
                    .call("list foreign keys", || connector.list_foreign_keys(Some(database.as_str()), None))
                    .await
                {
                    Ok(keys) => foreign_keys.extend(keys),
                    Err(err) => observer.unit_failed(&object, &err).await?,
                }
            }
        }

        observer.add_total(snapshot.tables.len()).await;
        let sample_rows = options.max_sample_rows.unwrap_or(self.max_sample_rows);
        for table in snapshot.tables.iter_mut() {
            let object = table.object_name();
            observer.before_unit(&object).await?;
            match self.describe_table(connector, table, options, sample_rows).await {
                Ok(()) => observer.unit_done(UnitOutcome::Completed).await,
                Err(err) => {
                    observer.unit_failed(&object, &err).await?;
                    observer.unit_done(UnitOutcome::Skipped).await;
                }
            }
        }

        if options.infer_relationships && options.include_columns {
            let relationships: Vec<_> = snapshot
                .tables
                .iter()
                .map(|table| infer_relationships(table, &snapshot.tables, &foreign_keys))
                .collect();
            for (table, found) in snapshot.tables.iter_mut().zip(relationships) {
                table.relationships = found;
            }
        }

        snapshot.discovered_at = Utc::now();
        info!(
            databases = snapshot.databases.len(),
            schemas = snapshot.schemas.len(),
            tables = snapshot.tables.len(),
            columns = snapshot.column_count(),
            relationships = snapshot.relationship_count(),
            "discovery walk finished"
        );
        Ok(snapshot)
    }

    /// Columns, samples and key candidates for one table
    ///
    /// Whatever was gathered before a failure stays on the descriptor.
    async fn describe_table(
        &self,
        connector: &dyn Connector,
        table: &mut TableDescriptor,
        options: &DiscoveryOptions,
        sample_rows: usize,
    ) -> EtlResult<()> {
        if !options.include_columns {
            return Ok(());
        }
        let (database, schema, name) = (table.database.clone(), table.schema.clone(), table.name.clone());
        let columns = self
            .call("list columns", || connector.list_columns(&database, &schema, &name))
            .await?;
        table.columns = columns.into_iter().map(ColumnDescriptor::from).collect();

        let table_ref = TableRef::from(&*table);
        if options.include_sample_data && sample_rows > 0 {
            let select = Statement::SelectRows {
                table: table_ref.clone(),
                filter: None,
                order_by: None,
                limit: Some(sample_rows),
                offset: None,
            };
            let sample = self.call("sample rows", || connector.execute_statement(&select)).await?;
            apply_sample_statistics(&mut table.columns, &sample.rows);
            table.sample_rows = sample.rows;
        }

        let mut unique = Vec::new();
        if !table.columns.iter().any(|c| c.primary_key) {
            for column in &table.columns {
                let probe = Statement::ColumnProfile {
                    table: table_ref.clone(),
                    column: column.name.clone(),
                };
                let profile = self.call("uniqueness probe", || connector.execute_statement(&probe)).await?;
                let total = profile.count("total_rows")?;
                if total > 0
                    && profile.count("distinct_values")? == total
                    && profile.count("non_null")? == total
                {
                    unique.push(column.name.clone());
                }
            }
        }
        table.primary_key_candidates = primary_key_candidates(&table.columns, &unique);
        Ok(())
    }
}
