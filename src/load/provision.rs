//! Idempotent namespace and table provisioning

use serde::Serialize;

use crate::warehouse::{Identifier, TargetTable, Warehouse};

use super::LoadResult;

/// What a provisioning call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioned {
    Created,
    AlreadyExisted,
}

/// Create the namespace if the catalog does not list it
pub async fn ensure_namespace(
    warehouse: &dyn Warehouse,
    namespace: &Identifier,
) -> LoadResult<Provisioned> {
    if warehouse.namespace_exists(namespace).await? {
        tracing::debug!(namespace = %namespace, "Namespace already exists");
        return Ok(Provisioned::AlreadyExisted);
    }

    warehouse
        .execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted()),
            &[],
        )
        .await?;
    tracing::info!(namespace = %namespace, "Created namespace");
    Ok(Provisioned::Created)
}

/// Create the table if the catalog does not list it
///
/// An existing table is left as it is, even when its columns differ from
/// `table`.
pub async fn ensure_table(warehouse: &dyn Warehouse, table: &TargetTable) -> LoadResult<Provisioned> {
    if warehouse.table_exists(&table.name).await? {
        tracing::debug!(table = %table.name, "Table already exists");
        return Ok(Provisioned::AlreadyExisted);
    }

    let sql = table.create_sql(warehouse.dialect())?;
    warehouse.execute(&sql, &[]).await?;
    tracing::info!(
        table = %table.name,
        columns = table.columns.len(),
        "Created table"
    );
    Ok(Provisioned::Created)
}
