//! Zero-row compile checks against the real engine.
//!
//! ```text
//! expressions ──▶ ProbeQuery::zero_row ──▶ ProbeEngine::probe ──▶ ProbeVerdict
//!                  (guarded shape:          (read-only,            Accepted |
//!                   WHERE 1 = 0)             zero rows)            Rejected)
//! ```
//!
//! A [`ProbeVerdict::Rejected`] is the engine's definitive answer. A
//! [`ProbeError`] means no answer was obtained.

mod query;
mod worker_engine;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::Transient;
use crate::worker::WorkerError;

pub use query::{ProbeQuery, PROBE_ALIAS_PREFIX};
pub use worker_engine::WorkerProbeEngine;

/// Errors raised while probing.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The assembled probe failed the call-site shape check.
    #[error("unsafe probe query: {0}")]
    Unsafe(String),

    #[error("scope has no source relation to probe against")]
    NoRelation,

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// The engine reported rows read or written by a zero-row probe.
    #[error("probe touched {0} row(s)")]
    RowsTouched(i64),

    #[error("probe engine error: {0}")]
    Worker(#[from] WorkerError),
}

impl Transient for ProbeError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Worker(e) => e.is_retriable(),
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// The engine's answer to a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Accepted,
    Rejected { message: String },
}

impl ProbeVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Something that can compile a probe against the real schema.
///
/// Implementations must never read or modify rows.
#[async_trait]
pub trait ProbeEngine: Send + Sync {
    /// Driver whose quoting the probe must use.
    fn driver(&self) -> crate::config::Driver;

    async fn probe(&self, query: &ProbeQuery) -> ProbeResult<ProbeVerdict>;
}
