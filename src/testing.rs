//! Deterministic doubles for the pipeline's external collaborators.
//!
//! Used by the integration tests and handy for wiring a pipeline without a
//! worker process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Driver;
use crate::generator::{CompletionClient, CompletionError};
use crate::probe::{ProbeEngine, ProbeError, ProbeQuery, ProbeResult, ProbeVerdict};

/// Completion client replaying scripted replies in order.
///
/// Once the script is exhausted every call returns the fallback reply.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `reply`.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.replies.lock().push_back(Ok(reply.into()));
        self
    }

    pub fn then_fail(self, error: CompletionError) -> Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| CompletionError::Rejected("script exhausted".to_string())),
        }
    }
}

/// Probe engine that accepts everything except scripted rejections.
pub struct ScriptedProbe {
    driver: Driver,
    rejections: Vec<(String, String)>,
    failures: Mutex<VecDeque<ProbeError>>,
    delays: Mutex<VecDeque<Duration>>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            rejections: Vec::new(),
            failures: Mutex::new(VecDeque::new()),
            delays: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Reject any probe whose SQL contains `needle`.
    pub fn rejecting(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rejections.push((needle.into(), message.into()));
        self
    }

    /// Fail the next call with `error` before answering normally.
    pub fn then_fail(self, error: ProbeError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Delay the answer to the next call that has no delay yet.
    ///
    /// `Duration::ZERO` answers immediately.
    pub fn then_delay(self, delay: Duration) -> Self {
        self.delays.lock().push_back(delay);
        self
    }

    /// SQL of every probe received, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ProbeEngine for ScriptedProbe {
    fn driver(&self) -> Driver {
        self.driver
    }

    async fn probe(&self, query: &ProbeQuery) -> ProbeResult<ProbeVerdict> {
        self.submitted.lock().push(query.sql().to_string());
        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        for (needle, message) in &self.rejections {
            if query.sql().contains(needle.as_str()) {
                return Ok(ProbeVerdict::Rejected {
                    message: message.clone(),
                });
            }
        }
        Ok(ProbeVerdict::Accepted)
    }
}

pub mod fixtures {
    //! Sample catalogs.

    use crate::catalog::{CatalogSnapshot, SourceRelation, StaticCatalogProvider};
    use crate::model::{ColumnDescriptor, DataType, ScopeId};

    pub const CREDIT_SCOPE: &str = "credit";
    pub const CREDIT_RELATION: &str = "ANALYTICS.CREDIT.DIM_CREDIT";

    pub fn credit_scope() -> ScopeId {
        ScopeId::new(CREDIT_SCOPE)
    }

    pub fn credit_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("LTM_EBITDA", DataType::Number)
                .with_display_name("LTM EBITDA")
                .with_synonyms(["ebitda", "trailing ebitda"]),
            ColumnDescriptor::new("TOTAL_LEVERAGE", DataType::Number)
                .with_display_name("Total Leverage")
                .with_synonyms(["leverage"]),
            ColumnDescriptor::new("BORROWER", DataType::Varchar).with_display_name("Borrower"),
            ColumnDescriptor::new("ORIGINATION_DATE", DataType::Date)
                .with_display_name("Origination Date"),
            ColumnDescriptor::new("IS_DEFAULTED", DataType::Boolean),
        ]
    }

    /// Provider with the `credit` scope registered.
    pub fn credit_catalog() -> StaticCatalogProvider {
        let provider = StaticCatalogProvider::new();
        provider
            .register(credit_scope(), SourceRelation::parse(CREDIT_RELATION), credit_columns())
            .expect("fixture columns are unique");
        provider
    }

    pub fn credit_snapshot() -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::new(credit_scope(), credit_columns());
        if let Some(relation) = SourceRelation::parse(CREDIT_RELATION) {
            snapshot = snapshot.with_relation(relation);
        }
        snapshot
    }
}
