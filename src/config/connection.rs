//! Database driver selection.
//!
//! The driver decides how probe queries quote identifiers and which
//! completion function an engine-hosted generator calls.

use serde::{Deserialize, Serialize};

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unsupported driver: {0}. Supported: mssql, duckdb, postgres, snowflake")]
    UnsupportedDriver(String),
}

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Microsoft SQL Server
    MsSql,
    /// DuckDB (file or in-memory)
    DuckDb,
    /// PostgreSQL
    Postgres,
    /// Snowflake
    Snowflake,
}

impl Driver {
    /// Parse driver from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConnectionError> {
        match s.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(Driver::MsSql),
            "duckdb" | "duck" => Ok(Driver::DuckDb),
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "snowflake" => Ok(Driver::Snowflake),
            other => Err(ConnectionError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Get the driver name for the worker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::MsSql => "mssql",
            Driver::DuckDb => "duckdb",
            Driver::Postgres => "postgres",
            Driver::Snowflake => "snowflake",
        }
    }

    /// Quote an identifier for this driver.
    ///
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Driver::MsSql => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}
