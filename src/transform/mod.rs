//! Shape normalization
//!
//! Pure functions that take a raw dataset of irregular shape and produce one
//! whose columns match a target table: flattening nested JSON, coercing dirty
//! numeric and date strings, standardizing names and deduplicating rows.
//!
//! Nothing here performs I/O. Every failure is a typed [`NormalizeError`];
//! no function hands back an empty or partially transformed dataset.

mod coerce;
mod flatten;
mod naming;
mod reshape;
mod surrogate;

pub use coerce::{
    DEFAULT_DATE_FORMAT, coerce_currency_strings_to_float, coerce_strings_to_date,
    coerce_strings_to_date_with_format,
};
pub use flatten::{NESTED_FIELD_SEPARATOR, flatten_nested_tabular, stringify_list_columns};
pub use naming::{standardize_column_name, standardize_column_names};
pub use reshape::{deduplicate_rows, drop_columns, fill_missing_columns, select_columns};
pub use surrogate::{
    CREATED_AT_COLUMN, SURROGATE_ID_COLUMN, UPDATED_AT_COLUMN, assign_surrogate_sequence,
    assign_surrogate_sequence_at,
};

use crate::dataset::{Dataset, DatasetError, ScalarType};

/// Error type for normalization
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// An expected column is absent from the input dataset
    #[error("Schema mismatch: column '{column}' not found (available: {available})")]
    SchemaMismatch { column: String, available: String },

    /// A cell could not be parsed under a fixed format
    #[error("Type coercion failed for column '{column}' at row {row}: cannot read '{value}' as {target}")]
    TypeCoercion {
        column: String,
        row: usize,
        value: String,
        target: ScalarType,
    },

    /// The reshaped dataset violated a dataset invariant
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Result type for normalization
pub type NormalizeResult<T> = Result<T, NormalizeError>;

impl NormalizeError {
    pub(crate) fn missing(column: &str, dataset: &Dataset) -> Self {
        NormalizeError::SchemaMismatch {
            column: column.to_string(),
            available: dataset.column_names().join(", "),
        }
    }
}

/// Fail with `SchemaMismatch` on the first name that is not a column of `dataset`
pub(crate) fn require_columns<S: AsRef<str>>(dataset: &Dataset, names: &[S]) -> NormalizeResult<()> {
    match names.iter().find(|n| !dataset.has_column(n.as_ref())) {
        Some(missing) => Err(NormalizeError::missing(missing.as_ref(), dataset)),
        None => Ok(()),
    }
}
