//! Wire types for the engine worker.
//!
//! One JSON object per line in each direction. A request carries a fresh
//! `id`; the response echoes it, so answers may arrive in any order.
//!
//! ```text
//! → {"id":"…","method":"query.execute","params":{"driver":"snowflake",…}}
//! ← {"id":"…","success":true,"result":{"columns":[],"rows":[],"row_count":0}}
//! ← {"id":"…","success":false,"error":{"code":"QUERY_REJECTED","message":"…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Driver;

/// Worker methods the pipeline calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Describe the columns of one table.
    Columns,
    /// Run a statement inside a read-only transaction.
    Execute,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Columns => "catalog.columns",
            Method::Execute => "query.execute",
        }
    }
}

/// Where the worker should run a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConnection {
    pub driver: Driver,
    pub connection_string: String,
}

impl EngineConnection {
    pub fn new(driver: Driver, connection_string: impl Into<String>) -> Self {
        Self {
            driver,
            connection_string: connection_string.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a, P> {
    pub id: &'a str,
    pub method: &'static str,
    pub params: P,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

/// Failure reported by the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ColumnsParams<'a> {
    #[serde(flatten)]
    pub connection: &'a EngineConnection,
    pub schema: &'a str,
    pub table: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExecuteParams<'a> {
    #[serde(flatten)]
    pub connection: &'a EngineConnection,
    pub sql: &'a str,
    #[serde(skip_serializing_if = "no_args")]
    pub args: &'a [Value],
    pub read_only: bool,
}

fn no_args(args: &&[Value]) -> bool {
    args.is_empty()
}

/// A column as the engine describes it.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineColumn {
    pub name: String,
    /// 1-based ordinal.
    pub position: i32,
    /// Engine spelling, e.g. `NUMBER(38,2)`.
    pub data_type: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnsResponse {
    pub columns: Vec<EngineColumn>,
}

/// Rows returned by `query.execute`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowSet {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub rows_affected: Option<i64>,
}

impl RowSet {
    pub fn first_cell(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Rows the statement returned or changed, whichever is larger.
    pub fn touched(&self) -> i64 {
        self.row_count
            .max(self.rows.len() as i64)
            .max(self.rows_affected.unwrap_or(0))
    }
}

/// Error codes with a dedicated [`super::WorkerError`] variant.
pub mod codes {
    pub const DRIVER_NOT_FOUND: &str = "DRIVER_NOT_FOUND";
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const QUERY_REJECTED: &str = "QUERY_REJECTED";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}
