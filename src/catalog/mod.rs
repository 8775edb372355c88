//! Catalog providers.
//!
//! A catalog lists the source columns, types and synonyms available to a
//! semantic scope. The pipeline only ever reads catalogs, and always through
//! a [`CatalogSnapshot`] taken once per operation.
//!
//! ```text
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │  StaticCatalogProvider    │   │  WorkerCatalogProvider    │
//! │  (TOML file / registered) │   │  (live schema via worker) │
//! └─────────────┬─────────────┘   └─────────────┬─────────────┘
//!               └──────────── CatalogProvider ──┘
//!                                  │
//!                                  ▼
//!                          CatalogSnapshot
//! ```

mod provider;
mod static_provider;
mod types;
mod worker_provider;

pub use provider::{CatalogError, CatalogProvider, CatalogResult};
pub use static_provider::StaticCatalogProvider;
pub use types::{CatalogSnapshot, SourceRelation};
pub use worker_provider::WorkerCatalogProvider;
