//! Post-load table evolution: surrogate key and audit columns

use serde::Serialize;

use crate::transform::{CREATED_AT_COLUMN, SURROGATE_ID_COLUMN, UPDATED_AT_COLUMN};
use crate::warehouse::{Identifier, QualifiedName, Warehouse, WarehouseError};

use super::{LoadError, LoadResult};

/// What [`evolve_table`] added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Evolution {
    pub audit_columns_added: bool,
    pub surrogate_key_added: bool,
}

impl Evolution {
    pub fn changed(&self) -> bool {
        self.audit_columns_added || self.surrogate_key_added
    }
}

/// Add an auto-incrementing `id` primary key to a loaded table
///
/// Existing rows are numbered from 1. Fails if the table already has a
/// primary key or an `id` column.
pub async fn add_surrogate_key(warehouse: &dyn Warehouse, table: &QualifiedName) -> LoadResult<()> {
    let columns = existing_columns(warehouse, table).await?;
    if warehouse.has_primary_key(table).await? {
        return Err(rejected(table, "table already has a primary key"));
    }
    if columns.iter().any(|c| c == SURROGATE_ID_COLUMN) {
        return Err(rejected(
            table,
            &format!("column '{}' already exists", SURROGATE_ID_COLUMN),
        ));
    }

    let dialect = warehouse.dialect();
    let statements =
        dialect.surrogate_key_statements(table, &Identifier::new(SURROGATE_ID_COLUMN)?)?;
    run_ddl(warehouse, &statements, dialect.transactional_ddl()).await?;

    tracing::info!(table = %table, column = SURROGATE_ID_COLUMN, "Added surrogate key");
    Ok(())
}

/// Add `created_at` and `updated_at` timestamp columns to a loaded table
///
/// Fails if either column already exists.
pub async fn add_audit_columns(warehouse: &dyn Warehouse, table: &QualifiedName) -> LoadResult<()> {
    let columns = existing_columns(warehouse, table).await?;
    if let Some(existing) = columns
        .iter()
        .find(|c| *c == CREATED_AT_COLUMN || *c == UPDATED_AT_COLUMN)
    {
        return Err(rejected(table, &format!("column '{}' already exists", existing)));
    }

    let dialect = warehouse.dialect();
    let statements = dialect.audit_column_statements(
        table,
        &Identifier::new(CREATED_AT_COLUMN)?,
        &Identifier::new(UPDATED_AT_COLUMN)?,
    );
    run_ddl(warehouse, &statements, dialect.transactional_ddl()).await?;

    tracing::info!(table = %table, "Added audit columns");
    Ok(())
}

/// Add whichever of the audit columns and surrogate key the table lacks
///
/// Audit columns go first: DuckDB cannot alter a table once it carries a
/// primary key index.
pub async fn evolve_table(warehouse: &dyn Warehouse, table: &QualifiedName) -> LoadResult<Evolution> {
    let columns = existing_columns(warehouse, table).await?;
    let mut evolution = Evolution::default();

    let has_audit = columns
        .iter()
        .any(|c| c == CREATED_AT_COLUMN || c == UPDATED_AT_COLUMN);
    if !has_audit {
        add_audit_columns(warehouse, table).await?;
        evolution.audit_columns_added = true;
    }

    let has_key = columns.iter().any(|c| c == SURROGATE_ID_COLUMN)
        || warehouse.has_primary_key(table).await?;
    if !has_key {
        add_surrogate_key(warehouse, table).await?;
        evolution.surrogate_key_added = true;
    }

    if !evolution.changed() {
        tracing::debug!(table = %table, "Table already evolved");
    }
    Ok(evolution)
}

async fn existing_columns(
    warehouse: &dyn Warehouse,
    table: &QualifiedName,
) -> LoadResult<Vec<String>> {
    let columns = warehouse.table_columns(table).await?;
    if columns.is_empty() {
        return Err(LoadError::TargetTableMissing(table.to_string()));
    }
    Ok(columns)
}

async fn run_ddl(
    warehouse: &dyn Warehouse,
    statements: &[String],
    transactional: bool,
) -> LoadResult<()> {
    if transactional {
        warehouse.execute_in_transaction(statements).await?;
    } else {
        for sql in statements {
            warehouse.execute(sql, &[]).await?;
        }
    }
    Ok(())
}

fn rejected(table: &QualifiedName, reason: &str) -> LoadError {
    LoadError::Warehouse(WarehouseError::StatementRejected(format!(
        "{}: {}",
        table, reason
    )))
}

#[cfg(all(test, feature = "duckdb-backend"))]
mod tests {
    use super::*;
    use crate::dataset::{Column, Dataset, Value};
    use crate::load::{ColumnOrder, MergeOptions, ensure_namespace, ensure_table, merge_into};
    use crate::warehouse::{DuckDBBackend, SqlType, TargetTable};

    fn salaries() -> Dataset {
        Dataset::from_columns(vec![
            Column::infer("player_name", vec!["A".into(), "B".into(), "C".into()]),
            Column::infer(
                "salary",
                vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)],
            ),
        ])
        .unwrap()
    }

    async fn loaded() -> (DuckDBBackend, QualifiedName) {
        let warehouse = DuckDBBackend::in_memory().unwrap();
        let table = TargetTable::new(
            "nba",
            "nba_salaries",
            &[("player_name", SqlType::Varchar(100)), ("salary", SqlType::Float)],
        )
        .unwrap();
        ensure_namespace(&warehouse, &table.name.namespace)
            .await
            .unwrap();
        ensure_table(&warehouse, &table).await.unwrap();
        merge_into(&warehouse, &table.name, &salaries(), &MergeOptions::default())
            .await
            .unwrap();
        (warehouse, table.name)
    }

    #[tokio::test]
    async fn test_surrogate_key_numbers_existing_rows() {
        let (warehouse, table) = loaded().await;
        add_surrogate_key(&warehouse, &table).await.unwrap();

        assert!(warehouse.has_primary_key(&table).await.unwrap());
        let result = warehouse
            .query("SELECT id FROM nba.nba_salaries ORDER BY id", &[])
            .await
            .unwrap();
        let ids: Vec<i64> = result
            .rows
            .iter()
            .filter_map(|r| r["id"].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_surrogate_key_twice_fails() {
        let (warehouse, table) = loaded().await;
        add_surrogate_key(&warehouse, &table).await.unwrap();
        let err = add_surrogate_key(&warehouse, &table).await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::Warehouse(WarehouseError::StatementRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_columns_twice_fails() {
        let (warehouse, table) = loaded().await;
        add_audit_columns(&warehouse, &table).await.unwrap();
        assert_eq!(
            warehouse.table_columns(&table).await.unwrap(),
            vec!["player_name", "salary", "created_at", "updated_at"]
        );
        assert!(add_audit_columns(&warehouse, &table).await.is_err());
    }

    #[tokio::test]
    async fn test_evolve_missing_table() {
        let warehouse = DuckDBBackend::in_memory().unwrap();
        let table = QualifiedName::new("nba", "nba_salaries").unwrap();
        let err = evolve_table(&warehouse, &table).await.unwrap_err();
        assert!(matches!(err, LoadError::TargetTableMissing(_)));
    }

    #[tokio::test]
    async fn test_evolve_twice_is_noop() {
        let (warehouse, table) = loaded().await;

        let first = evolve_table(&warehouse, &table).await.unwrap();
        assert_eq!(
            first,
            Evolution {
                audit_columns_added: true,
                surrogate_key_added: true
            }
        );

        let second = evolve_table(&warehouse, &table).await.unwrap();
        assert!(!second.changed());
    }

    #[tokio::test]
    async fn test_merge_after_evolve() {
        let (warehouse, table) = loaded().await;
        evolve_table(&warehouse, &table).await.unwrap();

        let more = Dataset::from_columns(vec![
            Column::infer("player_name", vec!["C".into(), "D".into()]),
            Column::infer("salary", vec![Value::Float(3.0), Value::Float(4.0)]),
        ])
        .unwrap();
        let outcome = merge_into(
            &warehouse,
            &table,
            &more,
            &MergeOptions::evolved(ColumnOrder::Strict),
        )
        .await
        .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped, 1);

        let result = warehouse
            .query(
                "SELECT id, created_at FROM nba.nba_salaries WHERE player_name = $1",
                &[Value::from("D")],
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0]["id"], serde_json::json!(4));
        assert!(result.rows[0]["created_at"].is_string());
    }
}
