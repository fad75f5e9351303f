//! Warehouse ETL - batch loading of downloaded tabular datasets
//!
//! Provides:
//! - Typed in-memory datasets read from CSV and JSON files
//! - Shape normalization (flattening, coercion, renaming, deduplication)
//! - Warehouse backends (DuckDB, PostgreSQL) behind one trait
//! - Idempotent provisioning, staged insert-or-ignore merges and table evolution
//! - A sequential pipeline over hand-written dataset jobs

pub mod dataset;
pub mod load;
pub mod pipeline;
pub mod transform;
pub mod warehouse;

// Re-export commonly used types
pub use dataset::{Column, Dataset, DatasetError, DatasetResult, ScalarType, Value};
pub use load::{ColumnOrder, LoadError, LoadResult, MergeOptions, MergeOutcome};
pub use pipeline::{DatasetJob, Pipeline, PipelineError, PipelineResult, RunReport};
pub use transform::{NormalizeError, NormalizeResult};
pub use warehouse::{
    Connector, EtlConfig, QualifiedName, TargetTable, Warehouse, WarehouseError, WarehouseResult,
};
