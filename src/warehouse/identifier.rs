//! Validated SQL identifiers
//!
//! Namespace, table and column names reach SQL text only through
//! [`Identifier`], which accepts a conservative allow-list and always renders
//! double-quoted. Values are never interpolated; they are bound as parameters.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{WarehouseError, WarehouseResult};

/// Maximum identifier length in bytes (PostgreSQL's NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Prefix of the staging table created for each merge
pub const STAGING_PREFIX: &str = "temp_";

static RE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

/// A namespace, table or column name that is safe to splice into SQL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validate a name against the identifier allow-list
    ///
    /// # Examples
    ///
    /// ```
    /// use warehouse_etl::warehouse::Identifier;
    ///
    /// assert!(Identifier::new("nba_payroll").is_ok());
    /// assert!(Identifier::new("fg%").is_err());
    /// assert!(Identifier::new("1st").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> WarehouseResult<Self> {
        let name = name.into();
        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(WarehouseError::InvalidIdentifier(format!(
                "'{}' exceeds {} bytes",
                name, MAX_IDENTIFIER_LENGTH
            )));
        }
        if !RE_IDENTIFIER.is_match(&name) {
            return Err(WarehouseError::InvalidIdentifier(format!(
                "'{}' must start with a letter or underscore and contain only letters, digits and underscores",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quote a list of column names, joined with `, `
pub fn quote_list<I: AsRef<str>>(columns: &[I]) -> WarehouseResult<String> {
    let quoted = columns
        .iter()
        .map(|c| Identifier::new(c.as_ref()).map(|i| i.quoted()))
        .collect::<WarehouseResult<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// A table name qualified by its namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedName {
    pub namespace: Identifier,
    pub table: Identifier,
}

impl QualifiedName {
    pub fn new(namespace: &str, table: &str) -> WarehouseResult<Self> {
        Ok(Self {
            namespace: Identifier::new(namespace)?,
            table: Identifier::new(table)?,
        })
    }

    /// `"namespace"."table"`
    pub fn quoted(&self) -> String {
        format!("{}.{}", self.namespace.quoted(), self.table.quoted())
    }

    /// The staging table used when merging into this table
    pub fn staging(&self) -> WarehouseResult<QualifiedName> {
        Ok(QualifiedName {
            namespace: self.namespace.clone(),
            table: Identifier::new(format!("{}{}", STAGING_PREFIX, self.table))?,
        })
    }

    /// A sibling object in the same namespace, e.g. a sequence
    pub fn with_suffix(&self, suffix: &str) -> WarehouseResult<QualifiedName> {
        Ok(QualifiedName {
            namespace: self.namespace.clone(),
            table: Identifier::new(format!("{}{}", self.table, suffix))?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_allow_list() {
        assert!(Identifier::new("player_name").is_ok());
        assert!(Identifier::new("_x1").is_ok());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("drop table;").is_err());
        assert!(Identifier::new("a\"b").is_err());
        assert!(Identifier::new("b.c").is_err());
        assert!(Identifier::new("x".repeat(64)).is_err());
        assert!(Identifier::new("x".repeat(63)).is_ok());
    }

    #[test]
    fn test_qualified_name() {
        let name = QualifiedName::new("nba", "nba_payroll").unwrap();
        assert_eq!(name.quoted(), "\"nba\".\"nba_payroll\"");
        assert_eq!(name.to_string(), "nba.nba_payroll");
        assert_eq!(
            name.staging().unwrap().quoted(),
            "\"nba\".\"temp_nba_payroll\""
        );
    }

    #[test]
    fn test_staging_name_too_long() {
        let name = QualifiedName::new("nba", &"t".repeat(60)).unwrap();
        assert!(matches!(
            name.staging(),
            Err(WarehouseError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_quote_list() {
        assert_eq!(quote_list(&["a", "b_c"]).unwrap(), "\"a\", \"b_c\"");
        assert!(quote_list(&["ok", "fg%"]).is_err());
    }
}
