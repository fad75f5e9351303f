//! Warehouse backend abstraction
//!
//! This module provides the warehouse endpoint the loader talks to:
//! - DuckDB: embedded warehouse, file based or in memory
//! - PostgreSQL: server warehouse, bulk loads through binary `COPY`
//!
//! The loader only needs catalog introspection, DDL execution, and bulk row
//! insertion with conflict skipping. Everything else stays in the backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
mod dialect;
mod identifier;
mod schema;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::{DuckDBBackend, DuckDBConnector};

#[cfg(feature = "postgres-backend")]
pub use self::postgres::{PostgresBackend, PostgresConnector};

pub use config::{EtlConfig, WarehouseBackendKind};
pub use dialect::Dialect;
pub use identifier::{Identifier, MAX_IDENTIFIER_LENGTH, QualifiedName, STAGING_PREFIX, quote_list};
pub use schema::{ColumnDef, SqlType, TableConstraint, TargetTable};

use crate::dataset::{Dataset, ScalarType, Value};

/// Error type for warehouse operations
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Failed to connect to the warehouse
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The warehouse rejected a statement
    #[error("Statement rejected: {0}")]
    StatementRejected(String),

    /// A transaction could not be started or committed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A dynamic name failed the identifier allow-list
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A dataset column has a type that cannot be stored
    #[error("Column '{column}' of type {data_type} cannot be stored in the warehouse")]
    UnsupportedType {
        column: String,
        data_type: ScalarType,
    },

    /// The warehouse is not configured for this build
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for warehouse operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data, one JSON object per row
    pub rows: Vec<QueryRow>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Text values of one column, skipping nulls
    pub fn column_strings(&self, column: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

/// Warehouse backend trait for catalog, DDL and bulk operations
///
/// One value is one warehouse session. Parameters use `$1`, `$2`, ...
/// placeholders. Each value is bound in the type the statement expects for
/// its placeholder; text values are parsed when that type is not text.
#[async_trait(?Send)]
pub trait Warehouse: Send + Sync {
    /// Execute a query and return its rows
    async fn query(&self, sql: &str, params: &[Value]) -> WarehouseResult<QueryResult>;

    /// Execute a statement and return the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> WarehouseResult<u64>;

    /// Execute statements in one transaction, returning each affected-row count
    ///
    /// Either every statement is committed or none is.
    async fn execute_in_transaction(&self, statements: &[String]) -> WarehouseResult<Vec<u64>>;

    /// Drop `table` if present, recreate it typed from `dataset`, and bulk
    /// load every row
    ///
    /// # Returns
    /// Number of rows written
    async fn replace_table(&self, table: &QualifiedName, dataset: &Dataset) -> WarehouseResult<u64>;

    /// Whether the namespace (schema) exists
    async fn namespace_exists(&self, namespace: &Identifier) -> WarehouseResult<bool> {
        let result = self
            .query(
                "SELECT schema_name::text AS schema_name FROM information_schema.schemata \
                 WHERE schema_name::text = $1::text",
                &[Value::from(namespace.as_str())],
            )
            .await?;
        Ok(!result.is_empty())
    }

    /// Whether the table exists
    async fn table_exists(&self, table: &QualifiedName) -> WarehouseResult<bool> {
        let result = self
            .query(
                "SELECT table_name::text AS table_name FROM information_schema.tables \
                 WHERE table_schema::text = $1::text AND table_name::text = $2::text",
                &catalog_params(table),
            )
            .await?;
        Ok(!result.is_empty())
    }

    /// Column names of a table in ordinal order, empty if the table is absent
    async fn table_columns(&self, table: &QualifiedName) -> WarehouseResult<Vec<String>> {
        let result = self
            .query(
                "SELECT column_name::text AS column_name FROM information_schema.columns \
                 WHERE table_schema::text = $1::text AND table_name::text = $2::text \
                 ORDER BY ordinal_position",
                &catalog_params(table),
            )
            .await?;
        Ok(result.column_strings("column_name"))
    }

    /// Column names and types of a table in ordinal order
    ///
    /// A type is `None` when it has no [`SqlType`] counterpart.
    async fn table_column_types(
        &self,
        table: &QualifiedName,
    ) -> WarehouseResult<Vec<(String, Option<SqlType>)>> {
        let result = self
            .query(
                "SELECT column_name::text AS column_name, data_type::text AS data_type \
                 FROM information_schema.columns \
                 WHERE table_schema::text = $1::text AND table_name::text = $2::text \
                 ORDER BY ordinal_position",
                &catalog_params(table),
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?.to_string();
                let sql_type = row
                    .get("data_type")
                    .and_then(|t| t.as_str())
                    .and_then(SqlType::from_catalog);
                Some((name, sql_type))
            })
            .collect())
    }

    /// Whether the table has a primary key
    async fn has_primary_key(&self, table: &QualifiedName) -> WarehouseResult<bool> {
        let result = self
            .query(
                "SELECT constraint_name::text AS constraint_name \
                 FROM information_schema.table_constraints \
                 WHERE table_schema::text = $1::text AND table_name::text = $2::text \
                 AND constraint_type::text = 'PRIMARY KEY'",
                &catalog_params(table),
            )
            .await?;
        Ok(!result.is_empty())
    }

    /// Number of rows in a table
    async fn row_count(&self, table: &QualifiedName) -> WarehouseResult<u64> {
        let result = self
            .query(
                &format!("SELECT COUNT(*) AS row_count FROM {}", table.quoted()),
                &[],
            )
            .await?;
        result
            .rows
            .first()
            .and_then(|r| r.get("row_count"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                WarehouseError::StatementRejected(format!("row count of {} unavailable", table))
            })
    }

    /// Check if the warehouse is reachable
    async fn health_check(&self) -> WarehouseResult<bool> {
        let result = self.query("SELECT 1 AS healthy", &[]).await?;
        Ok(!result.is_empty())
    }

    /// Backend type string ("duckdb" or "postgres")
    fn backend_type(&self) -> &'static str;

    /// SQL dialect spoken by this backend
    fn dialect(&self) -> Dialect;

    /// End the session
    async fn close(&self) -> WarehouseResult<()>;
}

fn catalog_params(table: &QualifiedName) -> [Value; 2] {
    [
        Value::from(table.namespace.as_str()),
        Value::from(table.table.as_str()),
    ]
}

/// Opens warehouse sessions
///
/// The pipeline opens one session per dataset and closes it when the dataset
/// is done, whatever the outcome.
#[async_trait(?Send)]
pub trait Connector {
    /// Open a new session
    async fn open(&self) -> WarehouseResult<Box<dyn Warehouse>>;

    /// Description of the target, with secrets masked
    fn describe(&self) -> String;
}

/// Build the connector selected by the configuration
pub fn connector_from_config(config: &EtlConfig) -> WarehouseResult<Box<dyn Connector>> {
    match config.warehouse.backend {
        #[cfg(feature = "duckdb-backend")]
        WarehouseBackendKind::DuckDB => {
            let connector = if config.is_in_memory() {
                DuckDBConnector::in_memory()?
            } else {
                DuckDBConnector::new(&config.warehouse.duckdb_path)?
            };
            Ok(Box::new(connector))
        }
        #[cfg(feature = "postgres-backend")]
        WarehouseBackendKind::Postgres => Ok(Box::new(PostgresConnector::new(
            config.postgres.clone(),
        ))),
        #[allow(unreachable_patterns)]
        other => Err(WarehouseError::ConfigError(format!(
            "backend '{}' is not enabled in this build",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_column_strings() {
        let result = QueryResult::new(
            vec!["column_name".to_string()],
            vec![
                serde_json::json!({"column_name": "team"}),
                serde_json::json!({"column_name": null}),
                serde_json::json!({"column_name": "payroll"}),
            ],
        );
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.column_strings("column_name"), vec!["team", "payroll"]);
    }

    #[cfg(feature = "duckdb-backend")]
    #[tokio::test]
    async fn test_connector_from_config_in_memory() {
        let config = EtlConfig::duckdb(config::IN_MEMORY_PATH);
        let connector = connector_from_config(&config).unwrap();
        let session = connector.open().await.unwrap();
        assert_eq!(session.backend_type(), "duckdb");
        assert!(session.health_check().await.unwrap());
        session.close().await.unwrap();
    }
}
