//! Pipeline configuration file support
//!
//! Handles parsing of `etl.toml` configuration files and environment
//! variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration filename
pub const CONFIG_FILENAME: &str = "etl.toml";

/// Default database filename for DuckDB
pub const DEFAULT_DUCKDB_FILENAME: &str = "warehouse.duckdb";

/// DuckDB path that selects an in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Default directory holding the acquired source files
pub const DEFAULT_DATA_DIR: &str = "data";

pub const ENV_WAREHOUSE_BACKEND: &str = "ETL_WAREHOUSE_BACKEND";
pub const ENV_DB_HOST: &str = "ETL_DB_HOST";
pub const ENV_DB_PORT: &str = "ETL_DB_PORT";
pub const ENV_DB_NAME: &str = "ETL_DB_NAME";
pub const ENV_DB_USER: &str = "ETL_DB_USER";
pub const ENV_DB_PASSWORD: &str = "ETL_DB_PASSWORD";
pub const ENV_DUCKDB_PATH: &str = "ETL_DUCKDB_PATH";
pub const ENV_DATA_DIR: &str = "ETL_DATA_DIR";

/// Error type for configuration handling
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("IO error: {0}")]
    IoError(String),

    /// The file is not valid TOML for this structure
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// The configuration could not be rendered as TOML
    #[error("Failed to serialize config: {0}")]
    SerializationError(String),

    /// A value is missing or out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration handling
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Warehouse backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackendKind {
    /// Embedded DuckDB database (default)
    #[default]
    DuckDB,
    /// PostgreSQL server
    Postgres,
}

impl std::str::FromStr for WarehouseBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(WarehouseBackendKind::DuckDB),
            "postgres" | "postgresql" => Ok(WarehouseBackendKind::Postgres),
            _ => Err(format!(
                "Unknown warehouse backend: {}. Use 'duckdb' or 'postgres'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for WarehouseBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarehouseBackendKind::DuckDB => write!(f, "duckdb"),
            WarehouseBackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Warehouse configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseSection {
    #[serde(default)]
    pub backend: WarehouseBackendKind,

    /// Path to the DuckDB file, or `:memory:`
    #[serde(default = "default_duckdb_path")]
    pub duckdb_path: String,
}

fn default_duckdb_path() -> String {
    DEFAULT_DUCKDB_FILENAME.to_string()
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            backend: WarehouseBackendKind::default(),
            duckdb_path: default_duckdb_path(),
        }
    }
}

/// PostgreSQL connection descriptor
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "warehouse".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

impl Default for PostgresSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: None,
        }
    }
}

impl PostgresSection {
    /// `user:****@host:port/database`, safe to log
    pub fn masked(&self) -> String {
        let password = if self.password.is_some() { ":****" } else { "" };
        format!(
            "{}{}@{}:{}/{}",
            self.user, password, self.host, self.port, self.database
        )
    }
}

impl std::fmt::Debug for PostgresSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Source data configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    /// Directory the acquisition layer unpacks source files into
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

/// Pipeline behaviour section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Add surrogate key and audit columns after loading
    #[serde(default = "default_true")]
    pub evolve: bool,

    /// Require the dataset's column order to match the table's exactly
    #[serde(default = "default_true")]
    pub strict_column_order: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            evolve: true,
            strict_column_order: true,
        }
    }
}

/// Main configuration structure
///
/// Represents the `etl.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EtlConfig {
    #[serde(default)]
    pub warehouse: WarehouseSection,

    #[serde(default)]
    pub postgres: PostgresSection,

    #[serde(default)]
    pub data: DataSection,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl EtlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an embedded DuckDB warehouse at `path`
    pub fn duckdb(path: impl Into<String>) -> Self {
        Self {
            warehouse: WarehouseSection {
                backend: WarehouseBackendKind::DuckDB,
                duckdb_path: path.into(),
            },
            ..Default::default()
        }
    }

    /// Configuration for a PostgreSQL warehouse
    pub fn postgres(postgres: PostgresSection) -> Self {
        Self {
            warehouse: WarehouseSection {
                backend: WarehouseBackendKind::Postgres,
                duckdb_path: String::new(),
            },
            postgres,
            ..Default::default()
        }
    }

    /// Load configuration from a file, then apply environment overrides
    ///
    /// A missing file yields the defaults.
    pub fn load(config_path: &Path) -> ConfigResult<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::IoError(format!("Failed to read config: {}", e)))?;
            Self::parse(&content)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Write configuration to a file
    pub fn save(&self, config_path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        std::fs::write(config_path, content)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config: {}", e)))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializationError(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    ///
    /// A backend or port value that does not parse is an error.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(backend) = lookup(ENV_WAREHOUSE_BACKEND) {
            self.warehouse.backend = backend
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", ENV_WAREHOUSE_BACKEND, e)))?;
        }

        if let Some(host) = lookup(ENV_DB_HOST) {
            self.postgres.host = host;
        }

        if let Some(port) = lookup(ENV_DB_PORT) {
            self.postgres.port = port.parse().map_err(|_| {
                ConfigError::Invalid(format!("{} is not a port number: {}", ENV_DB_PORT, port))
            })?;
        }

        if let Some(database) = lookup(ENV_DB_NAME) {
            self.postgres.database = database;
        }

        if let Some(user) = lookup(ENV_DB_USER) {
            self.postgres.user = user;
        }

        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.postgres.password = Some(password);
        }

        if let Some(path) = lookup(ENV_DUCKDB_PATH) {
            self.warehouse.duckdb_path = path;
        }

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data.dir = dir;
        }
        Ok(())
    }

    /// Check the values that cannot be defaulted
    pub fn validate(&self) -> ConfigResult<()> {
        match self.warehouse.backend {
            WarehouseBackendKind::DuckDB if self.warehouse.duckdb_path.is_empty() => Err(
                ConfigError::Invalid("warehouse.duckdb_path must not be empty".to_string()),
            ),
            WarehouseBackendKind::Postgres if self.postgres.host.is_empty() => Err(
                ConfigError::Invalid("postgres.host must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Whether the DuckDB warehouse lives in memory only
    pub fn is_in_memory(&self) -> bool {
        self.warehouse.duckdb_path == IN_MEMORY_PATH
    }

    /// Location of a source file inside the data directory
    pub fn source_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.data.dir).join(file_name)
    }

    /// Short description of the warehouse target, with secrets masked
    pub fn warehouse_summary(&self) -> String {
        match self.warehouse.backend {
            WarehouseBackendKind::DuckDB => format!("duckdb {}", self.warehouse.duckdb_path),
            WarehouseBackendKind::Postgres => format!("postgres {}", self.postgres.masked()),
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Warehouse ETL configuration

[warehouse]
# Warehouse backend: "duckdb" (default) or "postgres"
backend = "duckdb"

# Path to the DuckDB database file, or ":memory:"
duckdb_path = "warehouse.duckdb"

# PostgreSQL connection (used when backend = "postgres").
# The password is best supplied through ETL_DB_PASSWORD.
[postgres]
host = "localhost"
port = 5432
database = "warehouse"
user = "postgres"

[data]
# Directory holding the downloaded CSV and JSON files
dir = "data"

[pipeline]
# Add surrogate id and audit timestamp columns after loading
evolve = true

# Require source columns in exactly the table's order
strict_column_order = true
"#
}
