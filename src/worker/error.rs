use std::io;

use thiserror::Error;

use super::protocol::{codes, WireError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker pipe error: {0}")]
    Io(#[source] io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode worker response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("worker did not answer within {0} ms")]
    Timeout(u64),

    #[error("worker exited")]
    Exited,

    /// The engine refused the statement: syntax, unknown object, permissions.
    #[error("query rejected: {0}")]
    Rejected(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Driver missing or connection refused.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("worker error {code}: {message}")]
    Remote { code: String, message: String },
}

impl WorkerError {
    pub(crate) fn from_wire(error: WireError) -> Self {
        let WireError { code, message } = error;
        match code.as_str() {
            codes::QUERY_REJECTED => Self::Rejected(message),
            codes::RATE_LIMITED => Self::RateLimited(message),
            codes::DRIVER_NOT_FOUND | codes::CONNECTION_FAILED => Self::Unavailable(message),
            codes::INVALID_REQUEST => Self::InvalidRequest(message),
            _ => Self::Remote { code, message },
        }
    }

    /// Transport and throttling failures. An engine rejection is an answer.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Exited | Self::Unavailable(_) | Self::RateLimited(_)
        )
    }
}
