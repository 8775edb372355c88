//! Engine worker transport.
//!
//! The worker is a long-running child process that owns the database
//! drivers. The pipeline reaches the relational engine only through it:
//! column introspection for catalogs, and read-only statements for
//! zero-row probes and engine-hosted completions.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            WorkerClient (tokio)              │
//! │  NDJSON over stdin/stdout, id-correlated     │
//! └──────────────────────────────────────────────┘
//!                 │ stdin        ▲ stdout
//!                 ▼              │
//! ┌──────────────────────────────────────────────┐
//! │        Engine worker (child process)         │
//! └──────────────────────────────────────────────┘
//! ```

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
pub use protocol::{EngineConnection, RowSet};
