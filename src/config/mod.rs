//! Configuration module.
//!
//! Handles driver selection, environment variable expansion and the
//! `fieldforge.toml` settings file.

mod connection;
mod settings;

pub use connection::{ConnectionError, Driver};
pub use settings::{
    expand_env_vars, CatalogSettings, ConnectionSettings, GeneratorSettings, ProbeSettings,
    Settings, SettingsError, StoreSettings, ToolSettings, WorkerSettings,
};
