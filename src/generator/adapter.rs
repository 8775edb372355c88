//! The expression generator adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::completion::{CompletionClient, CompletionError};
use super::prompt::build_prompt;
use crate::catalog::CatalogSnapshot;
use crate::expr::locate_word;
use crate::model::{DataType, FieldCandidate, ScopeId};
use crate::retry::{with_retry, RetryPolicy, Transient};

/// Longest request accepted when none is configured.
pub const DEFAULT_MAX_REQUEST_CHARS: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Retries exhausted on timeouts or rate limiting.
    #[error("completion failed after {attempts} attempt(s): {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: CompletionError,
    },

    #[error("malformed generator output: {0}")]
    MalformedOutput(String),

    /// The completion service refused the request.
    #[error("completion refused: {0}")]
    Upstream(#[source] CompletionError),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// The fixed output schema the completion must produce.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneratorOutput {
    name: String,
    #[serde(rename = "displayName")]
    display_name: String,
    expr: String,
    #[serde(rename = "type")]
    result_type: String,
}

/// Point-in-time copy of the adapter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeneratorMetering {
    pub calls: u64,
    pub attempts: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    attempts: AtomicU64,
    failures: AtomicU64,
}

/// Turns a natural-language request into an untrusted [`FieldCandidate`].
///
/// Nothing returned here has been validated.
pub struct GeneratorAdapter {
    client: Arc<dyn CompletionClient>,
    retry: RetryPolicy,
    max_request_chars: usize,
    counters: Counters,
}

impl GeneratorAdapter {
    pub fn new(client: Arc<dyn CompletionClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            max_request_chars: DEFAULT_MAX_REQUEST_CHARS,
            counters: Counters::default(),
        }
    }

    pub fn with_max_request_chars(mut self, max: usize) -> Self {
        self.max_request_chars = max;
        self
    }

    pub async fn generate(
        &self,
        scope: &ScopeId,
        request: &str,
        catalog: &CatalogSnapshot,
    ) -> GenerationResult<FieldCandidate> {
        self.check_request(request)?;
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let prompt = build_prompt(request, catalog);
        let client = self.client.as_ref();
        let prompt = prompt.as_str();
        let outcome = with_retry(&self.retry, "completion", move || client.complete(prompt)).await;
        self.counters
            .attempts
            .fetch_add(u64::from(outcome.attempts), Ordering::Relaxed);

        let result = match outcome.result {
            Ok(text) => parse_output(&text, catalog),
            Err(e) if e.is_transient() => Err(GenerationError::Transient {
                attempts: outcome.attempts,
                source: e,
            }),
            Err(e) => Err(GenerationError::Upstream(e)),
        };

        match &result {
            Ok(candidate) => {
                info!(scope = %scope, name = %candidate.name, attempts = outcome.attempts, "candidate generated")
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(scope = %scope, attempts = outcome.attempts, error = %e, "generation failed");
            }
        }
        result
    }

    pub fn metering(&self) -> GeneratorMetering {
        GeneratorMetering {
            calls: self.counters.calls.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn check_request(&self, request: &str) -> GenerationResult<()> {
        let request = request.trim();
        if request.is_empty() {
            return Err(GenerationError::InvalidRequest("request is empty".to_string()));
        }
        let chars = request.chars().count();
        if chars > self.max_request_chars {
            return Err(GenerationError::InvalidRequest(format!(
                "request is {chars} characters, the limit is {}",
                self.max_request_chars
            )));
        }
        Ok(())
    }
}

/// Decode a completion into a candidate.
///
/// The reply must be exactly one JSON object of the fixed schema, optionally
/// inside a Markdown code fence.
fn parse_output(text: &str, catalog: &CatalogSnapshot) -> GenerationResult<FieldCandidate> {
    let body = strip_code_fence(text.trim());
    let output: GeneratorOutput = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedOutput(format!("reply is not the expected object: {e}")))?;

    if output.name.trim().is_empty() {
        return Err(GenerationError::MalformedOutput("name is empty".to_string()));
    }
    if output.expr.trim().is_empty() {
        return Err(GenerationError::MalformedOutput("expr is empty".to_string()));
    }
    let result_type = DataType::from_str(&output.result_type).ok_or_else(|| {
        GenerationError::MalformedOutput(format!("unknown type '{}'", output.result_type))
    })?;

    let references_catalog = catalog
        .columns
        .iter()
        .any(|c| locate_word(&output.expr, &c.name).is_some());
    if !references_catalog {
        return Err(GenerationError::MalformedOutput(format!(
            "expression '{}' references no catalog column",
            output.expr
        )));
    }

    debug!(name = %output.name, expr = %output.expr, "decoded generator output");
    Ok(FieldCandidate::new(output.name.trim(), output.expr.trim())
        .with_display_name(output.display_name.trim())
        .with_result_type(result_type))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
