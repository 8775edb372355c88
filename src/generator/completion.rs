//! Completion client trait and the worker-backed implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::retry::Transient;
use crate::worker::{EngineConnection, WorkerClient, WorkerError};

/// Errors from the external completion capability.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion rate limited: {0}")]
    RateLimited(String),

    #[error("completion service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a definitive refusal.
    #[error("completion rejected: {0}")]
    Rejected(String),
}

impl Transient for CompletionError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl From<WorkerError> for CompletionError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::RateLimited(m) => Self::RateLimited(m),
            WorkerError::Timeout(ms) => Self::Timeout(Duration::from_millis(ms)),
            e if e.is_retriable() => Self::Unavailable(e.to_string()),
            e => Self::Rejected(e.to_string()),
        }
    }
}

/// A text-completion capability: prompt in, text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Completion through an engine-hosted function, e.g.
/// `SELECT SNOWFLAKE.CORTEX.COMPLETE(?, ?)`.
pub struct WorkerCompletionClient {
    client: Arc<WorkerClient>,
    connection: EngineConnection,
    function: String,
    model: String,
}

impl WorkerCompletionClient {
    pub fn new(
        client: Arc<WorkerClient>,
        connection: EngineConnection,
        function: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            connection,
            function: function.into(),
            model: model.into(),
        }
    }

    fn statement(&self) -> String {
        format!("SELECT {}(?, ?)", self.function)
    }
}

#[async_trait]
impl CompletionClient for WorkerCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let sql = self.statement();
        debug!(function = %self.function, model = %self.model, chars = prompt.len(), "requesting completion");

        let args = vec![Value::String(self.model.clone()), Value::String(prompt.to_string())];
        let response = self
            .client
            .execute_read_only(&self.connection, &sql, &args)
            .await?;

        match response.first_cell() {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(Value::Null) | None => Err(CompletionError::Rejected(
                "completion function returned no text".to_string(),
            )),
            Some(other) => Ok(other.to_string()),
        }
    }
}
