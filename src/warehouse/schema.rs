//! Typed table definitions
//!
//! A [`TargetTable`] is used only when the table does not exist yet; once it
//! exists, the warehouse catalog is the authority on its columns.

use serde::Serialize;

use crate::dataset::{Dataset, ScalarType};

use super::dialect::Dialect;
use super::identifier::{Identifier, QualifiedName, quote_list};
use super::{WarehouseError, WarehouseResult};

/// Column types that may appear in a table definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Float,
    Varchar(u32),
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl SqlType {
    /// Storage type for a dataset column type
    pub fn for_scalar(data_type: ScalarType) -> Option<SqlType> {
        match data_type {
            ScalarType::Boolean => Some(SqlType::Boolean),
            ScalarType::Integer => Some(SqlType::BigInt),
            ScalarType::Float => Some(SqlType::Float),
            ScalarType::Text => Some(SqlType::Text),
            ScalarType::Date => Some(SqlType::Date),
            ScalarType::Timestamp => Some(SqlType::Timestamp),
            ScalarType::List | ScalarType::Record => None,
        }
    }

    /// Type of a column as reported by `information_schema.columns.data_type`
    ///
    /// Character types of any length map to `Text`. Types the loader never
    /// creates map to `None`.
    pub fn from_catalog(data_type: &str) -> Option<SqlType> {
        let lowered = data_type.trim().to_ascii_lowercase();
        let base = lowered.split('(').next().unwrap_or_default().trim();
        match base {
            "smallint" | "int2" | "integer" | "int" | "int4" => Some(SqlType::Integer),
            "bigint" | "int8" => Some(SqlType::BigInt),
            "double precision" | "double" | "float8" | "float" | "real" | "float4" => {
                Some(SqlType::Float)
            }
            "text" | "varchar" | "character varying" | "character" | "char" | "bpchar" => {
                Some(SqlType::Text)
            }
            "boolean" | "bool" => Some(SqlType::Boolean),
            "date" => Some(SqlType::Date),
            "timestamp" | "timestamp without time zone" => Some(SqlType::Timestamp),
            _ => None,
        }
    }
}

/// One column of a table definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: Identifier,
    pub sql_type: SqlType,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: SqlType) -> WarehouseResult<Self> {
        Ok(Self {
            name: Identifier::new(name)?,
            sql_type,
        })
    }
}

/// Table-level constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TableConstraint {
    /// `UNIQUE (...)` over the listed columns
    Unique(Vec<Identifier>),
}

/// A table to provision: qualified name, ordered columns, constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetTable {
    pub name: QualifiedName,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

impl TargetTable {
    /// Build a definition from `(column, type)` pairs
    pub fn new(namespace: &str, table: &str, columns: &[(&str, SqlType)]) -> WarehouseResult<Self> {
        let columns = columns
            .iter()
            .map(|(name, sql_type)| ColumnDef::new(name, *sql_type))
            .collect::<WarehouseResult<Vec<_>>>()?;
        Ok(Self {
            name: QualifiedName::new(namespace, table)?,
            columns,
            constraints: Vec::new(),
        })
    }

    /// Definition whose columns mirror a dataset's names and types
    ///
    /// Fails if a column name is not a valid identifier or a column holds
    /// lists or records.
    pub fn from_dataset(name: QualifiedName, dataset: &Dataset) -> WarehouseResult<Self> {
        let mut columns = Vec::with_capacity(dataset.column_count());
        for column in dataset.columns() {
            let sql_type = SqlType::for_scalar(column.data_type()).ok_or_else(|| {
                WarehouseError::UnsupportedType {
                    column: column.name().to_string(),
                    data_type: column.data_type(),
                }
            })?;
            columns.push(ColumnDef::new(column.name(), sql_type)?);
        }
        Ok(Self {
            name,
            columns,
            constraints: Vec::new(),
        })
    }

    /// Add a uniqueness constraint over every column
    pub fn unique_over_all_columns(mut self) -> Self {
        let all = self.columns.iter().map(|c| c.name.clone()).collect();
        self.constraints.push(TableConstraint::Unique(all));
        self
    }

    /// Add a uniqueness constraint over the named columns
    pub fn with_unique(mut self, columns: &[&str]) -> WarehouseResult<Self> {
        for name in columns {
            if !self.columns.iter().any(|c| c.name.as_str() == *name) {
                return Err(WarehouseError::InvalidIdentifier(format!(
                    "unique constraint names unknown column '{}'",
                    name
                )));
            }
        }
        let columns = columns
            .iter()
            .map(|c| Identifier::new(*c))
            .collect::<WarehouseResult<Vec<_>>>()?;
        self.constraints.push(TableConstraint::Unique(columns));
        Ok(self)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement in the given dialect
    pub fn create_sql(&self, dialect: Dialect) -> WarehouseResult<String> {
        if self.columns.is_empty() {
            return Err(WarehouseError::InvalidIdentifier(format!(
                "table {} has no columns",
                self.name
            )));
        }

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name.quoted(), dialect.type_name(c.sql_type)))
            .collect();
        let constraints = if dialect.emits_table_constraints() {
            self.constraints.as_slice()
        } else {
            &[]
        };
        for constraint in constraints {
            match constraint {
                TableConstraint::Unique(columns) => {
                    parts.push(format!("UNIQUE ({})", quote_list(columns)?));
                }
            }
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name.quoted(),
            parts.join(", ")
        ))
    }
}
