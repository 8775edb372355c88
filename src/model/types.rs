//! Primitive types shared across the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical column type as declared in a scope's catalog.
///
/// Unknown engine types map to [`DataType::Variant`], which only takes part
/// in null checks and equality comparisons with other variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Number,
    Varchar,
    Boolean,
    Date,
    Timestamp,
    Variant,
}

impl DataType {
    /// Parse a data type name, accepting the common engine spellings.
    ///
    /// Parameterised types (`DECIMAL(18, 2)`, `VARCHAR(255)`) are matched on
    /// their base name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let base = s
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_uppercase();

        match base.as_str() {
            "NUMBER" | "NUMERIC" | "DECIMAL" | "INT" | "INTEGER" | "BIGINT" | "SMALLINT"
            | "TINYINT" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "REAL" | "MONEY" => {
                Some(DataType::Number)
            }
            "VARCHAR" | "NVARCHAR" | "CHAR" | "NCHAR" | "TEXT" | "STRING" => {
                Some(DataType::Varchar)
            }
            "BOOLEAN" | "BOOL" | "BIT" => Some(DataType::Boolean),
            "DATE" => Some(DataType::Date),
            "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" | "DATETIME"
            | "DATETIME2" => Some(DataType::Timestamp),
            "VARIANT" | "OBJECT" | "ARRAY" | "JSON" => Some(DataType::Variant),
            _ => None,
        }
    }

    /// Parse a type name, falling back to `Variant` for anything unrecognised.
    pub fn from_engine_type(s: &str) -> Self {
        Self::from_str(s).unwrap_or(DataType::Variant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Number => "NUMBER",
            DataType::Varchar => "VARCHAR",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Variant => "VARIANT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Number)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a semantic scope (one semantic model / business domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScopeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Normalise a field or column name for uniqueness checks.
///
/// Names compare case-insensitively and ignore surrounding whitespace, so
/// `ebitda_x_leverage` and ` EBITDA_X_LEVERAGE` share one key.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}
