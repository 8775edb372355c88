//! TOML-based configuration for fieldforge.
//!
//! Example configuration:
//! ```toml
//! [connections.default]
//! driver = "snowflake"
//! connection_string = "${CREDIT_DB_CONNECTION_STRING}"
//!
//! [worker]
//! path = "./fieldforge-worker"
//! request_timeout_ms = 30000
//!
//! [store]
//! path = "./fields.db"
//!
//! [catalog]
//! path = "./catalog.toml"
//!
//! # or, without a catalog file, introspect the live schema:
//! # [catalog.scopes]
//! # credit = "ANALYTICS.CREDIT.DIM_CREDIT"
//!
//! [generator]
//! completion_function = "SNOWFLAKE.CORTEX.COMPLETE"
//! model = "mistral-large2"
//!
//! [generator.retry]
//! max_attempts = 4
//!
//! [probe]
//! enabled = true
//!
//! [[tools.functions]]
//! name = "PD_FROM_RATING"
//! description = "Probability of default for an internal rating"
//! output = "NUMBER"
//! inputs = [{ name = "rating", data_type = "VARCHAR" }]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::connection::Driver;
use crate::catalog::SourceRelation;
use crate::retry::RetryPolicy;
use crate::tools::FunctionDescriptor;
use crate::worker::EngineConnection;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Failed to determine home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named database connections.
    pub connections: BTreeMap<String, ConnectionSettings>,

    /// Worker configuration.
    pub worker: WorkerSettings,

    /// Field store configuration.
    pub store: StoreSettings,

    /// Catalog source configuration.
    pub catalog: CatalogSettings,

    /// Default retry policy for external calls.
    pub retry: RetryPolicy,

    /// Expression generator configuration.
    pub generator: GeneratorSettings,

    /// Zero-row probe configuration.
    pub probe: ProbeSettings,

    /// Operator-registered tools.
    pub tools: ToolSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Database driver (mssql, duckdb, postgres, snowflake).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Default schema for this connection.
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::from_str(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary.
    pub path: Option<String>,

    /// Extra command-line arguments for the worker.
    pub args: Vec<String>,

    /// Transport-level timeout for a single request.
    pub request_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Field store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database path. Defaults to `~/.fieldforge/fields.db`.
    pub path: Option<String>,
}

/// Catalog source configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Path of a TOML catalog file.
    pub path: Option<String>,

    /// Scope to source relation, read through the worker when `path` is unset.
    pub scopes: BTreeMap<String, String>,
}

/// Expression generator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorSettings {
    /// Engine-hosted completion function, called as `fn(model, prompt)`.
    pub completion_function: String,

    /// Model name passed to the completion function.
    pub model: String,

    /// Longest accepted natural-language request, in characters.
    pub max_request_chars: usize,

    /// Retry policy for completion calls. Falls back to `[retry]`.
    pub retry: Option<RetryPolicy>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            completion_function: "SNOWFLAKE.CORTEX.COMPLETE".to_string(),
            model: "mistral-large2".to_string(),
            max_request_chars: 2_000,
            retry: None,
        }
    }
}

/// Zero-row probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Submit probes to the engine. When false, `validate` runs the static
    /// steps only and `create`/`submit` refuse to persist.
    pub enabled: bool,

    /// Retry policy for probe calls. Falls back to `[retry]`.
    pub retry: Option<RetryPolicy>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: None,
        }
    }
}

/// Operator-registered tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolSettings {
    pub functions: Vec<FunctionDescriptor>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `FIELDFORGE_CONFIG`
    /// 2. `./fieldforge.toml`
    /// 3. `<config_dir>/fieldforge/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("FIELDFORGE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("fieldforge.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fieldforge").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject settings that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let policies = [
            ("retry", Some(&self.retry)),
            ("generator.retry", self.generator.retry.as_ref()),
            ("probe.retry", self.probe.retry.as_ref()),
        ];
        for (field, policy) in policies {
            let Some(policy) = policy else { continue };
            if policy.max_attempts == 0 {
                return Err(SettingsError::InvalidConfig(format!(
                    "{field}.max_attempts must be at least 1"
                )));
            }
            if policy.multiplier < 1.0 {
                return Err(SettingsError::InvalidConfig(format!(
                    "{field}.multiplier must be >= 1.0"
                )));
            }
            if policy.timeout_ms == 0 {
                return Err(SettingsError::InvalidConfig(format!(
                    "{field}.timeout_ms must be positive"
                )));
            }
        }

        if self.generator.max_request_chars == 0 {
            return Err(SettingsError::InvalidConfig(
                "generator.max_request_chars must be positive".to_string(),
            ));
        }

        for conn in self.connections.values() {
            conn.driver_type()?;
        }

        for (scope, relation) in &self.catalog.scopes {
            if SourceRelation::parse(relation).is_none() {
                return Err(SettingsError::InvalidConfig(format!(
                    "catalog.scopes.{scope}: '{relation}' is not a table name"
                )));
            }
        }
        if self.catalog.path.is_none() && !self.catalog.scopes.is_empty() && self.connections.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "catalog.scopes needs a connection to introspect".to_string(),
            ));
        }

        Ok(())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection ("default" if present, otherwise the first by name).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionSettings)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// The default connection as the worker addresses it.
    pub fn engine_connection(&self) -> Result<Option<EngineConnection>, SettingsError> {
        let Some((_, conn)) = self.default_connection() else {
            return Ok(None);
        };
        Ok(Some(EngineConnection::new(
            conn.driver_type()?,
            conn.resolved_connection_string()?,
        )))
    }

    /// Configured worker binary path, with environment variables expanded.
    pub fn worker_path(&self) -> Option<PathBuf> {
        let path = self.worker.path.as_ref()?;
        let expanded = expand_env_vars(path).ok()?;
        Some(PathBuf::from(expanded))
    }

    /// Resolved field store path.
    pub fn store_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.store.path {
            Some(path) => Ok(PathBuf::from(expand_env_vars(path)?)),
            None => {
                let home = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
                Ok(home.join(".fieldforge").join("fields.db"))
            }
        }
    }

    /// Retry policy for completion calls.
    pub fn generator_retry(&self) -> RetryPolicy {
        self.generator.retry.clone().unwrap_or_else(|| self.retry.clone())
    }

    /// Retry policy for probe calls.
    pub fn probe_retry(&self) -> RetryPolicy {
        self.probe.retry.clone().unwrap_or_else(|| self.retry.clone())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // A lone $ is kept as-is
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
