//! DuckDB warehouse backend implementation
//!
//! Provides an embedded warehouse using DuckDB. Sessions opened from one
//! [`DuckDBConnector`] share the same database, so an in-memory warehouse
//! keeps its tables across sessions for as long as the connector lives.

use async_trait::async_trait;
use chrono::NaiveDate;
use duckdb::types::{TimeUnit, ValueRef};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{
    Connector, Dialect, Identifier, QualifiedName, QueryResult, TargetTable, Warehouse,
    WarehouseError, WarehouseResult, quote_list,
};
use crate::dataset::{Dataset, Value};

/// DuckDB warehouse session
pub struct DuckDBBackend {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// DuckDB connection (wrapped in Mutex for thread safety)
    connection: Mutex<duckdb::Connection>,
}

impl DuckDBBackend {
    /// Open a file-based warehouse
    pub fn new(db_path: impl AsRef<Path>) -> WarehouseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            WarehouseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
        })
    }

    /// Open a private in-memory warehouse
    pub fn in_memory() -> WarehouseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            WarehouseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    fn lock(&self) -> WarehouseResult<std::sync::MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| WarehouseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// A new session on the same database
    fn try_clone(&self) -> WarehouseResult<Self> {
        let connection = self.lock()?.try_clone().map_err(|e| {
            WarehouseError::ConnectionFailed(format!("Failed to open DuckDB session: {}", e))
        })?;
        Ok(Self {
            db_path: self.db_path.clone(),
            connection: Mutex::new(connection),
        })
    }

    /// Convert a DuckDB row to a JSON object
    fn row_to_json(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i) {
                Ok(value_ref) => Self::value_ref_to_json(value_ref),
                Err(_) => serde_json::Value::Null,
            };
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Convert a DuckDB ValueRef to a JSON value
    fn value_ref_to_json(value: ValueRef) -> serde_json::Value {
        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Boolean(b) => serde_json::Value::Bool(b),
            ValueRef::TinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::SmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Int(i) => serde_json::Value::Number(i.into()),
            ValueRef::BigInt(i) => serde_json::Value::Number(i.into()),
            // i128 may not fit in a JSON number
            ValueRef::HugeInt(i) => serde_json::Value::String(i.to_string()),
            ValueRef::UTinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::USmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UBigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Double(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            ValueRef::Date32(days) => NaiveDate::default()
                .checked_add_signed(chrono::Duration::days(days as i64))
                .map(|d| serde_json::Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Timestamp(unit, v) => {
                let micros = match unit {
                    TimeUnit::Second => v.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => v.saturating_mul(1_000),
                    TimeUnit::Microsecond => v,
                    TimeUnit::Nanosecond => v / 1_000,
                };
                chrono::DateTime::from_timestamp_micros(micros)
                    .map(|ts| serde_json::Value::String(ts.naive_utc().to_string()))
                    .unwrap_or(serde_json::Value::Null)
            }
            ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
            other => serde_json::Value::String(format!("{:?}", other)),
        }
    }

    /// Bind a cell with its own type, for bulk loads
    fn to_duckdb_value(value: &Value) -> duckdb::types::Value {
        use duckdb::types::Value as Db;

        match value {
            Value::Null => Db::Null,
            Value::Boolean(b) => Db::Boolean(*b),
            Value::Integer(i) => Db::BigInt(*i),
            Value::Float(f) => Db::Double(*f),
            Value::Text(s) => Db::Text(s.clone()),
            Value::Date(d) => {
                Db::Date32(d.signed_duration_since(NaiveDate::default()).num_days() as i32)
            }
            Value::Timestamp(ts) => {
                Db::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros())
            }
            other => Db::Text(other.to_string()),
        }
    }

    /// Bind a parameter as text
    fn to_text_param(value: &Value) -> duckdb::types::Value {
        match value {
            Value::Null => duckdb::types::Value::Null,
            other => duckdb::types::Value::Text(other.to_string()),
        }
    }
}

fn rejected(context: &str, e: duckdb::Error) -> WarehouseError {
    WarehouseError::StatementRejected(format!("{}: {}", context, e))
}

#[async_trait(?Send)]
impl Warehouse for DuckDBBackend {
    async fn query(&self, sql: &str, params: &[Value]) -> WarehouseResult<QueryResult> {
        let start = std::time::Instant::now();
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| rejected("Prepare failed", e))?;

        // In DuckDB 1.4+, the query must run before its columns are known
        let mut result_rows = stmt
            .query(duckdb::params_from_iter(params.iter().map(Self::to_text_param)))
            .map_err(|e| rejected("Query failed", e))?;

        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows
            .next()
            .map_err(|e| rejected("Row fetch error", e))?
        {
            rows.push(Self::row_to_json(row, &columns));
        }

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> WarehouseResult<u64> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                sql,
                duckdb::params_from_iter(params.iter().map(Self::to_text_param)),
            )
            .map_err(|e| rejected("Execute failed", e))?;
        tracing::trace!(sql, affected, "Executed statement");
        Ok(affected as u64)
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> WarehouseResult<Vec<u64>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        let mut counts = Vec::with_capacity(statements.len());
        for sql in statements {
            let affected = tx
                .execute(sql, [])
                .map_err(|e| rejected("Execute failed", e))?;
            counts.push(affected as u64);
        }

        tx.commit()
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;
        Ok(counts)
    }

    async fn replace_table(&self, table: &QualifiedName, dataset: &Dataset) -> WarehouseResult<u64> {
        let definition = TargetTable::from_dataset(table.clone(), dataset)?;
        let create = definition.create_sql(Dialect::DuckDb)?;
        let names: Vec<&Identifier> = definition.columns.iter().map(|c| &c.name).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.quoted(),
            quote_list(names.as_slice())?,
            placeholders.join(", ")
        );

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        tx.execute(&format!("DROP TABLE IF EXISTS {}", table.quoted()), [])
            .map_err(|e| rejected("Drop failed", e))?;
        tx.execute(&create, [])
            .map_err(|e| rejected("Create failed", e))?;

        let mut written = 0u64;
        {
            let mut stmt = tx
                .prepare(&insert)
                .map_err(|e| rejected("Prepare failed", e))?;
            for row in dataset.rows() {
                stmt.execute(duckdb::params_from_iter(
                    row.into_iter().map(Self::to_duckdb_value),
                ))
                .map_err(|e| rejected("Insert failed", e))?;
                written += 1;
            }
        }

        tx.commit()
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        tracing::debug!(table = %table, rows = written, "Replaced table");
        Ok(written)
    }

    async fn has_primary_key(&self, table: &QualifiedName) -> WarehouseResult<bool> {
        let result = self
            .query(
                "SELECT constraint_type FROM duckdb_constraints() \
                 WHERE schema_name = $1::text AND table_name = $2::text \
                 AND constraint_type = 'PRIMARY KEY'",
                &[
                    Value::from(table.namespace.as_str()),
                    Value::from(table.table.as_str()),
                ],
            )
            .await?;
        Ok(!result.is_empty())
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn close(&self) -> WarehouseResult<()> {
        // The connection is closed when the session is dropped
        Ok(())
    }
}

/// Opens sessions on one DuckDB database
pub struct DuckDBConnector {
    root: DuckDBBackend,
}

impl DuckDBConnector {
    pub fn new(db_path: impl AsRef<Path>) -> WarehouseResult<Self> {
        Ok(Self {
            root: DuckDBBackend::new(db_path)?,
        })
    }

    pub fn in_memory() -> WarehouseResult<Self> {
        Ok(Self {
            root: DuckDBBackend::in_memory()?,
        })
    }
}

#[async_trait(?Send)]
impl Connector for DuckDBConnector {
    async fn open(&self) -> WarehouseResult<Box<dyn Warehouse>> {
        Ok(Box::new(self.root.try_clone()?))
    }

    fn describe(&self) -> String {
        match self.root.db_path() {
            Some(path) => format!("duckdb {}", path.display()),
            None => "duckdb :memory:".to_string(),
        }
    }
}
