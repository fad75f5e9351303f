//! Provisioning, bulk loading and table evolution
//!
//! Everything in here runs against one warehouse session handed in by the
//! caller:
//!
//! 1. [`ensure_namespace`] and [`ensure_table`] create what is missing.
//! 2. [`merge_into`] stages a dataset and inserts the rows the target does not
//!    already hold.
//! 3. [`evolve_table`] adds the surrogate key and audit columns once.

mod evolve;
mod merge;
mod provision;

pub use evolve::{Evolution, add_audit_columns, add_surrogate_key, evolve_table};
pub use merge::{ColumnOrder, MergeOptions, MergeOutcome, merge_into};
pub use provision::{Provisioned, ensure_namespace, ensure_table};

use crate::warehouse::WarehouseError;

/// Error type for load operations
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The dataset's columns do not line up with the existing table
    #[error("Column mismatch for {table}: table has [{}], dataset has [{}]", .expected.join(", "), .found.join(", "))]
    ColumnMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// The merge target has not been provisioned
    #[error("Target table {0} does not exist")]
    TargetTableMissing(String),

    /// The warehouse rejected an operation
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;
