//! PostgreSQL warehouse backend implementation
//!
//! Provides a PostgreSQL backend for server warehouses. Staging tables are
//! filled with binary `COPY ... FROM STDIN`, and multi-statement work runs in
//! a transaction.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};

use super::config::PostgresSection;
use super::{
    Connector, Dialect, QualifiedName, QueryResult, SqlType, TargetTable, Warehouse,
    WarehouseError, WarehouseResult, quote_list,
};
use crate::dataset::{Dataset, ScalarType, Value};

/// PostgreSQL warehouse session
pub struct PostgresBackend {
    /// Connection target, password masked
    target: String,
    /// PostgreSQL client (wrapped for async access)
    client: Arc<Mutex<tokio_postgres::Client>>,
}

impl PostgresBackend {
    /// Connect using a connection descriptor
    pub async fn connect(section: &PostgresSection) -> WarehouseResult<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&section.host)
            .port(section.port)
            .dbname(&section.database)
            .user(&section.user);
        if let Some(password) = &section.password {
            config.password(password);
        }

        let (client, connection) = config.connect(tokio_postgres::NoTls).await.map_err(|e| {
            WarehouseError::ConnectionFailed(format!(
                "Failed to connect to PostgreSQL at {}: {}",
                section.masked(),
                e
            ))
        })?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self {
            target: section.masked(),
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Connection target with the password masked
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Convert a PostgreSQL row to a JSON object
    fn row_to_json(row: &tokio_postgres::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = Self::get_column_value(row, i);
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> serde_json::Value {
        // Try different types
        if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
            return v
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<chrono::NaiveDate>>(idx) {
            return v
                .map(|d| serde_json::Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            return v
                .map(|ts| serde_json::Value::String(ts.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }

        serde_json::Value::Null
    }

    /// Bind each parameter in the type the prepared statement declares
    ///
    /// Nulls are typed too. Text is parsed for numeric, boolean and date
    /// placeholders; anything else is sent as text.
    fn bind_params(
        params: &[Value],
        types: &[Type],
    ) -> WarehouseResult<Vec<Box<dyn ToSql + Sync + Send>>> {
        if params.len() != types.len() {
            return Err(WarehouseError::StatementRejected(format!(
                "statement takes {} parameters, {} given",
                types.len(),
                params.len()
            )));
        }
        params
            .iter()
            .zip(types)
            .enumerate()
            .map(|(i, (value, ty))| Self::bind_param(value, ty, i + 1))
            .collect()
    }

    fn bind_param(
        value: &Value,
        ty: &Type,
        position: usize,
    ) -> WarehouseResult<Box<dyn ToSql + Sync + Send>> {
        let mismatch = || {
            WarehouseError::StatementRejected(format!(
                "parameter ${} ({}) cannot be bound as {}",
                position, value, ty
            ))
        };

        let bound: Box<dyn ToSql + Sync + Send> = match *ty {
            Type::INT2 => Box::new(
                convert(value, |v| integer(v).and_then(|n| i16::try_from(n).ok()))
                    .ok_or_else(mismatch)?,
            ),
            Type::INT4 => Box::new(
                convert(value, |v| integer(v).and_then(|n| i32::try_from(n).ok()))
                    .ok_or_else(mismatch)?,
            ),
            Type::INT8 => Box::new(convert(value, integer).ok_or_else(mismatch)?),
            Type::FLOAT4 => Box::new(
                convert(value, |v| float(v).map(|f| f as f32)).ok_or_else(mismatch)?,
            ),
            Type::FLOAT8 => Box::new(convert(value, float).ok_or_else(mismatch)?),
            Type::BOOL => Box::new(
                convert(value, |v| match v {
                    Value::Boolean(b) => Some(*b),
                    Value::Text(s) => s.parse().ok(),
                    _ => None,
                })
                .ok_or_else(mismatch)?,
            ),
            Type::DATE => Box::new(
                convert(value, |v| match v {
                    Value::Date(d) => Some(*d),
                    Value::Text(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
                    _ => None,
                })
                .ok_or_else(mismatch)?,
            ),
            Type::TIMESTAMP => Box::new(
                convert(value, |v| match v {
                    Value::Timestamp(ts) => Some(*ts),
                    Value::Date(d) => d.and_hms_opt(0, 0, 0),
                    Value::Text(s) => s.parse::<chrono::NaiveDateTime>().ok(),
                    _ => None,
                })
                .ok_or_else(mismatch)?,
            ),
            _ => Box::new(match value {
                Value::Null => None,
                other => Some(other.to_string()),
            }),
        };
        Ok(bound)
    }

    /// Wire type used by binary COPY for a staging column
    fn copy_type(sql_type: SqlType) -> Type {
        match sql_type {
            SqlType::Integer => Type::INT4,
            SqlType::BigInt => Type::INT8,
            SqlType::Float => Type::FLOAT8,
            SqlType::Varchar(_) => Type::VARCHAR,
            SqlType::Text => Type::TEXT,
            SqlType::Boolean => Type::BOOL,
            SqlType::Date => Type::DATE,
            SqlType::Timestamp => Type::TIMESTAMP,
        }
    }

    /// A cell typed for its column, so nulls carry the column's type too
    fn copy_cell(data_type: ScalarType, value: &Value) -> Box<dyn ToSql + Sync + Send> {
        match data_type {
            ScalarType::Boolean => Box::new(match value {
                Value::Boolean(b) => Some(*b),
                _ => None,
            }),
            ScalarType::Integer => Box::new(value.as_i64()),
            ScalarType::Float => Box::new(value.as_f64()),
            ScalarType::Date => Box::new(match value {
                Value::Date(d) => Some(*d),
                _ => None,
            }),
            ScalarType::Timestamp => Box::new(match value {
                Value::Timestamp(ts) => Some(*ts),
                _ => None,
            }),
            _ => Box::new(value.as_text().map(str::to_string)),
        }
    }
}

/// `Some(None)` for a null, `Some(Some(_))` when `f` converts the value
fn convert<T>(value: &Value, f: impl FnOnce(&Value) -> Option<T>) -> Option<Option<T>> {
    match value {
        Value::Null => Some(None),
        other => f(other).map(Some),
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Text(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Text(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn rejected(context: &str, e: tokio_postgres::Error) -> WarehouseError {
    let message = match e.as_db_error() {
        Some(db) => rejection_message(context, db.message(), db.detail()),
        None => format!("{}: {}", context, e),
    };
    WarehouseError::StatementRejected(message)
}

fn rejection_message(context: &str, message: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("{}: {} ({})", context, message, detail),
        None => format!("{}: {}", context, message),
    }
}

#[async_trait(?Send)]
impl Warehouse for PostgresBackend {
    async fn query(&self, sql: &str, params: &[Value]) -> WarehouseResult<QueryResult> {
        let start = std::time::Instant::now();
        let client = self.client.lock().await;

        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| rejected("Prepare failed", e))?;
        let values = Self::bind_params(params, statement.params())?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| &**v as &(dyn ToSql + Sync)).collect();

        let rows = client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| rejected("Query failed", e))?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };

        let json_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| Self::row_to_json(row, &columns))
            .collect();

        Ok(QueryResult {
            columns,
            rows: json_rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> WarehouseResult<u64> {
        let client = self.client.lock().await;
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| rejected("Prepare failed", e))?;
        let values = Self::bind_params(params, statement.params())?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| &**v as &(dyn ToSql + Sync)).collect();

        let affected = client
            .execute(&statement, &param_refs)
            .await
            .map_err(|e| rejected("Execute failed", e))?;
        tracing::trace!(sql, affected, "Executed statement");
        Ok(affected)
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> WarehouseResult<Vec<u64>> {
        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        let mut counts = Vec::with_capacity(statements.len());
        for sql in statements {
            let affected = tx
                .execute(sql.as_str(), &[])
                .await
                .map_err(|e| rejected("Execute failed", e))?;
            counts.push(affected);
        }

        tx.commit()
            .await
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;
        Ok(counts)
    }

    async fn replace_table(&self, table: &QualifiedName, dataset: &Dataset) -> WarehouseResult<u64> {
        let definition = TargetTable::from_dataset(table.clone(), dataset)?;
        let create = definition.create_sql(Dialect::Postgres)?;
        let names: Vec<&str> = definition.columns.iter().map(|c| c.name.as_str()).collect();
        let types: Vec<Type> = definition
            .columns
            .iter()
            .map(|c| Self::copy_type(c.sql_type))
            .collect();
        let copy = format!(
            "COPY {} ({}) FROM STDIN BINARY",
            table.quoted(),
            quote_list(names.as_slice())?
        );
        let column_types: Vec<ScalarType> =
            dataset.columns().iter().map(|c| c.data_type()).collect();

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        tx.batch_execute(&format!("DROP TABLE IF EXISTS {}; {}", table.quoted(), create))
            .await
            .map_err(|e| rejected("Create failed", e))?;

        let sink = tx
            .copy_in(copy.as_str())
            .await
            .map_err(|e| rejected("Copy failed", e))?;
        let writer = BinaryCopyInWriter::new(sink, &types);
        let mut writer = std::pin::pin!(writer);

        for row in dataset.rows() {
            let cells: Vec<Box<dyn ToSql + Sync + Send>> = row
                .iter()
                .zip(&column_types)
                .map(|(value, data_type)| Self::copy_cell(*data_type, value))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = cells
                .iter()
                .map(|c| &**c as &(dyn ToSql + Sync))
                .collect();
            writer
                .as_mut()
                .write(&refs)
                .await
                .map_err(|e| rejected("Copy failed", e))?;
        }

        let written = writer
            .as_mut()
            .finish()
            .await
            .map_err(|e| rejected("Copy failed", e))?;

        tx.commit()
            .await
            .map_err(|e| WarehouseError::TransactionFailed(e.to_string()))?;

        tracing::debug!(table = %table, rows = written, "Replaced table");
        Ok(written)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn close(&self) -> WarehouseResult<()> {
        // The connection task ends when the client is dropped
        Ok(())
    }
}

/// Opens a new PostgreSQL connection per session
pub struct PostgresConnector {
    section: PostgresSection,
}

impl PostgresConnector {
    pub fn new(section: PostgresSection) -> Self {
        Self { section }
    }
}

#[async_trait(?Send)]
impl Connector for PostgresConnector {
    async fn open(&self) -> WarehouseResult<Box<dyn Warehouse>> {
        Ok(Box::new(PostgresBackend::connect(&self.section).await?))
    }

    fn describe(&self) -> String {
        format!("postgres {}", self.section.masked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(params: &[Value], types: &[Type]) -> Vec<String> {
        PostgresBackend::bind_params(params, types)
            .unwrap()
            .iter()
            .map(|p| format!("{:?}", p))
            .collect()
    }

    #[test]
    fn test_params_follow_declared_types() {
        assert_eq!(
            bound(
                &[Value::from("nba"), Value::Integer(3), Value::Null],
                &[Type::TEXT, Type::INT4, Type::INT4]
            ),
            vec!["Some(\"nba\")", "Some(3)", "None"]
        );
        assert_eq!(
            bound(
                &[Value::from("3"), Value::Integer(2), Value::from("2020-01-05")],
                &[Type::INT8, Type::FLOAT8, Type::DATE]
            ),
            vec!["Some(3)", "Some(2.0)", "Some(2020-01-05)"]
        );
        assert_eq!(bound(&[Value::Integer(7)], &[Type::VARCHAR]), vec!["Some(\"7\")"]);
    }

    #[test]
    fn test_param_that_does_not_fit_is_rejected() {
        assert!(matches!(
            PostgresBackend::bind_params(&[Value::from("abc")], &[Type::INT4]),
            Err(WarehouseError::StatementRejected(_))
        ));
        assert!(matches!(
            PostgresBackend::bind_params(&[Value::Integer(70_000)], &[Type::INT2]),
            Err(WarehouseError::StatementRejected(_))
        ));
        assert!(PostgresBackend::bind_params(&[], &[Type::TEXT]).is_err());
    }

    #[test]
    fn test_rejection_message_carries_server_text() {
        assert_eq!(
            rejection_message(
                "Execute failed",
                "column \"payroll\" is of type double precision but expression is of type text",
                None
            ),
            "Execute failed: column \"payroll\" is of type double precision but expression is of type text"
        );
        assert_eq!(
            rejection_message("Copy failed", "duplicate key value", Some("Key (id)=(1) already exists.")),
            "Copy failed: duplicate key value (Key (id)=(1) already exists.)"
        );
    }

    #[test]
    fn test_copy_types() {
        assert_eq!(PostgresBackend::copy_type(SqlType::BigInt), Type::INT8);
        assert_eq!(PostgresBackend::copy_type(SqlType::Float), Type::FLOAT8);
        assert_eq!(PostgresBackend::copy_type(SqlType::Date), Type::DATE);
    }

    #[test]
    fn test_connector_masks_password() {
        let connector = PostgresConnector::new(PostgresSection {
            password: Some("hunter2".to_string()),
            ..Default::default()
        });
        let description = connector.describe();
        assert!(!description.contains("hunter2"));
        assert!(description.starts_with("postgres postgres:****@localhost"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let section = PostgresSection {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        match PostgresBackend::connect(&section).await {
            Err(WarehouseError::ConnectionFailed(message)) => {
                assert!(message.contains("127.0.0.1:1"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
