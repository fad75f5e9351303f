//! Client-side surrogate identity and audit columns

use chrono::{NaiveDateTime, Utc};

use crate::dataset::{Column, Dataset, DatasetError, ScalarType, Value};

use super::NormalizeResult;

pub const SURROGATE_ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Add `id`, `created_at` and `updated_at` stamped with the current UTC time
pub fn assign_surrogate_sequence(dataset: &mut Dataset) -> NormalizeResult<()> {
    assign_surrogate_sequence_at(dataset, Utc::now().naive_utc())
}

/// Add a 1-based gap-free `id` column and audit columns set to `now`
///
/// Every row gets the same `created_at`, and `updated_at` equals it. Fails
/// without changing the dataset if any of the three columns already exists.
pub fn assign_surrogate_sequence_at(dataset: &mut Dataset, now: NaiveDateTime) -> NormalizeResult<()> {
    for name in [SURROGATE_ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
        if dataset.has_column(name) {
            return Err(DatasetError::DuplicateColumn(name.to_string()).into());
        }
    }

    let rows = dataset.row_count();
    let ids = (1..=rows as i64).map(Value::Integer).collect();
    dataset.push_column(Column::new(SURROGATE_ID_COLUMN, ScalarType::Integer, ids)?)?;
    dataset.push_column(Column::filled(CREATED_AT_COLUMN, Value::Timestamp(now), rows))?;
    dataset.push_column(Column::filled(UPDATED_AT_COLUMN, Value::Timestamp(now), rows))?;

    tracing::debug!(rows, "Assigned surrogate sequence");
    Ok(())
}
