//! Staged insert-or-ignore merge

use serde::Serialize;

use crate::dataset::Dataset;
use crate::transform::{CREATED_AT_COLUMN, SURROGATE_ID_COLUMN, UPDATED_AT_COLUMN};
use crate::warehouse::{Identifier, QualifiedName, SqlType, Warehouse};

use super::{LoadError, LoadResult};

/// How dataset columns are compared with the target's columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    /// Same names in the same order
    #[default]
    Strict,
    /// Same set of names, any order
    ByName,
}

/// Options for [`merge_into`]
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub column_order: ColumnOrder,
    /// Target columns filled by the warehouse; they are left out of the
    /// comparison and the insert when the dataset does not carry them
    pub managed_columns: Vec<String>,
}

impl MergeOptions {
    /// Options for tables that have been through [`super::evolve_table`]
    pub fn evolved(column_order: ColumnOrder) -> Self {
        Self {
            column_order,
            managed_columns: [SURROGATE_ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Row counts of one merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MergeOutcome {
    /// Rows written to the staging table
    pub staged: u64,
    /// Rows inserted into the target
    pub inserted: u64,
    /// Staged rows the target already held
    pub skipped: u64,
}

/// Merge a dataset into an existing table, skipping rows it already holds
///
/// 1. Writes the dataset to `temp_<table>` in the same namespace, replacing
///    any earlier staging table.
/// 2. Fails with [`LoadError::TargetTableMissing`] if the target is absent.
/// 3. Compares the target's columns with the dataset's; any difference fails
///    with [`LoadError::ColumnMismatch`].
/// 4. Inserts the distinct staged rows, cast to the target's column types,
///    and drops the staging table in one transaction.
///
/// The staging table is dropped on every failure after step 1.
pub async fn merge_into(
    warehouse: &dyn Warehouse,
    table: &QualifiedName,
    dataset: &Dataset,
    options: &MergeOptions,
) -> LoadResult<MergeOutcome> {
    let staging = table.staging()?;
    let staged = warehouse.replace_table(&staging, dataset).await?;
    tracing::debug!(staging = %staging, rows = staged, "Staged dataset");

    match merge_staged(warehouse, table, &staging, dataset, options, staged).await {
        Ok(outcome) => {
            tracing::info!(
                table = %table,
                staged = outcome.staged,
                inserted = outcome.inserted,
                skipped = outcome.skipped,
                "Merged dataset"
            );
            Ok(outcome)
        }
        Err(e) => {
            let drop = format!("DROP TABLE IF EXISTS {}", staging.quoted());
            if let Err(drop_err) = warehouse.execute(&drop, &[]).await {
                tracing::warn!(staging = %staging, error = %drop_err, "Failed to drop staging table");
            }
            Err(e)
        }
    }
}

async fn merge_staged(
    warehouse: &dyn Warehouse,
    table: &QualifiedName,
    staging: &QualifiedName,
    dataset: &Dataset,
    options: &MergeOptions,
    staged: u64,
) -> LoadResult<MergeOutcome> {
    if !warehouse.table_exists(table).await? {
        return Err(LoadError::TargetTableMissing(table.to_string()));
    }

    let catalog: Vec<(String, Option<SqlType>)> = warehouse
        .table_column_types(table)
        .await?
        .into_iter()
        .filter(|(c, _)| !(options.managed_columns.contains(c) && !dataset.has_column(c)))
        .collect();
    let target_columns: Vec<String> = catalog.iter().map(|(c, _)| c.clone()).collect();
    let columns: Vec<(Identifier, Option<SqlType>)> =
        matching_columns(table, &target_columns, dataset, options.column_order)?
            .into_iter()
            .zip(catalog.iter().map(|(_, t)| *t))
            .collect();

    let insert = warehouse
        .dialect()
        .merge_insert_sql(table, staging, &columns);
    let drop = format!("DROP TABLE {}", staging.quoted());
    let counts = warehouse.execute_in_transaction(&[insert, drop]).await?;

    let inserted = counts.first().copied().unwrap_or(0);
    Ok(MergeOutcome {
        staged,
        inserted,
        skipped: staged.saturating_sub(inserted),
    })
}

/// Columns to insert, in target order, if the dataset lines up with the target
fn matching_columns(
    table: &QualifiedName,
    target_columns: &[String],
    dataset: &Dataset,
    order: ColumnOrder,
) -> LoadResult<Vec<Identifier>> {
    let found = dataset.column_names();
    let matches = match order {
        ColumnOrder::Strict => target_columns.iter().map(String::as_str).eq(found.iter().copied()),
        ColumnOrder::ByName => {
            let mut expected: Vec<&str> = target_columns.iter().map(String::as_str).collect();
            let mut actual = found.clone();
            expected.sort_unstable();
            actual.sort_unstable();
            expected == actual
        }
    };

    if !matches {
        return Err(LoadError::ColumnMismatch {
            table: table.to_string(),
            expected: target_columns.to_vec(),
            found: found.iter().map(|c| c.to_string()).collect(),
        });
    }

    Ok(target_columns
        .iter()
        .map(Identifier::new)
        .collect::<Result<Vec<_>, _>>()?)
}
