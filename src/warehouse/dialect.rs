//! SQL dialect differences between warehouse backends

use serde::Serialize;

use super::WarehouseResult;
use super::identifier::{Identifier, QualifiedName};
use super::schema::SqlType;

/// Suffix of the sequence backing a DuckDB surrogate key
const SEQUENCE_SUFFIX: &str = "_id_seq";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    DuckDb,
}

impl Dialect {
    /// Type name as written in DDL
    pub fn type_name(&self, sql_type: SqlType) -> String {
        match (self, sql_type) {
            (_, SqlType::Integer) => "INTEGER".to_string(),
            (_, SqlType::BigInt) => "BIGINT".to_string(),
            (Dialect::Postgres, SqlType::Float) => "FLOAT".to_string(),
            (Dialect::DuckDb, SqlType::Float) => "DOUBLE".to_string(),
            (_, SqlType::Varchar(n)) => format!("VARCHAR({})", n),
            (_, SqlType::Text) => "TEXT".to_string(),
            (_, SqlType::Boolean) => "BOOLEAN".to_string(),
            (_, SqlType::Date) => "DATE".to_string(),
            (_, SqlType::Timestamp) => "TIMESTAMP".to_string(),
        }
    }

    /// Statements that add an auto-incrementing primary key to a loaded table
    ///
    /// PostgreSQL does it in one `SERIAL PRIMARY KEY` column. DuckDB has no
    /// serial type, so existing rows are numbered from a sequence which then
    /// becomes the column default.
    pub fn surrogate_key_statements(
        &self,
        table: &QualifiedName,
        column: &Identifier,
    ) -> WarehouseResult<Vec<String>> {
        let target = table.quoted();
        let column = column.quoted();
        match self {
            Dialect::Postgres => Ok(vec![format!(
                "ALTER TABLE {} ADD COLUMN {} SERIAL PRIMARY KEY",
                target, column
            )]),
            Dialect::DuckDb => {
                let sequence = table.with_suffix(SEQUENCE_SUFFIX)?;
                let next = format!("nextval('{}')", sequence);
                Ok(vec![
                    format!("CREATE SEQUENCE {} START 1", sequence.quoted()),
                    format!("ALTER TABLE {} ADD COLUMN {} BIGINT", target, column),
                    format!("UPDATE {} SET {} = {}", target, column, next),
                    format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                        target, column, next
                    ),
                    format!("ALTER TABLE {} ADD PRIMARY KEY ({})", target, column),
                ])
            }
        }
    }

    /// Statements that add `created_at` and `updated_at` audit columns
    ///
    /// `created_at` defaults to the row's creation time and `updated_at` to the
    /// time of the statement that wrote it; existing rows receive the time the
    /// columns were added. DuckDB only takes constant defaults in `ADD COLUMN`,
    /// so it backfills and sets the defaults afterwards.
    pub fn audit_column_statements(
        &self,
        table: &QualifiedName,
        created_at: &Identifier,
        updated_at: &Identifier,
    ) -> Vec<String> {
        let target = table.quoted();
        match self {
            Dialect::Postgres => vec![format!(
                "ALTER TABLE {} ADD COLUMN {} TIMESTAMP DEFAULT CURRENT_TIMESTAMP, ADD COLUMN {} TIMESTAMP DEFAULT now()",
                target,
                created_at.quoted(),
                updated_at.quoted()
            )],
            Dialect::DuckDb => {
                let (created, updated) = (created_at.quoted(), updated_at.quoted());
                vec![
                    format!("ALTER TABLE {} ADD COLUMN {} TIMESTAMP", target, created),
                    format!("ALTER TABLE {} ADD COLUMN {} TIMESTAMP", target, updated),
                    format!(
                        "UPDATE {} SET {} = CURRENT_TIMESTAMP, {} = now()",
                        target, created, updated
                    ),
                    format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT CURRENT_TIMESTAMP",
                        target, created
                    ),
                    format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT now()",
                        target, updated
                    ),
                ]
            }
        }
    }

    /// Set-based insert of staged rows that skips rows already in the target
    ///
    /// Each staged column is cast to the target column's type when it is
    /// known. Staged duplicates collapse to one row, and a row is skipped
    /// when an existing row equals it on every inserted column, nulls
    /// included. PostgreSQL keeps `ON CONFLICT DO NOTHING` so the target's
    /// uniqueness constraint still applies to concurrent writers.
    pub fn merge_insert_sql(
        &self,
        target: &QualifiedName,
        staging: &QualifiedName,
        columns: &[(Identifier, Option<SqlType>)],
    ) -> String {
        let names: Vec<String> = columns.iter().map(|(c, _)| c.quoted()).collect();
        let staged: Vec<String> = columns
            .iter()
            .map(|(c, sql_type)| match sql_type {
                Some(t) => format!("CAST(s.{} AS {})", c.quoted(), self.type_name(*t)),
                None => format!("s.{}", c.quoted()),
            })
            .collect();
        let matched: Vec<String> = names
            .iter()
            .zip(&staged)
            .map(|(name, value)| format!("t.{} IS NOT DISTINCT FROM {}", name, value))
            .collect();

        let insert = format!(
            "INSERT INTO {} ({}) SELECT DISTINCT {} FROM {} AS s \
             WHERE NOT EXISTS (SELECT 1 FROM {} AS t WHERE {})",
            target.quoted(),
            names.join(", "),
            staged.join(", "),
            staging.quoted(),
            target.quoted(),
            matched.join(" AND ")
        );
        match self {
            Dialect::Postgres => format!("{} ON CONFLICT DO NOTHING", insert),
            Dialect::DuckDb => insert,
        }
    }

    /// Whether `CREATE TABLE` carries table-level `UNIQUE` constraints
    pub fn emits_table_constraints(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Whether the surrogate key statements may run inside one transaction
    pub fn transactional_ddl(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::DuckDb => write!(f, "duckdb"),
        }
    }
}
