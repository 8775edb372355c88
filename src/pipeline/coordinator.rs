//! The field pipeline coordinator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::outcome::{
    DeprecationOutcome, FieldRequest, PipelineError, PipelineOutcome, PipelineResult,
};
use super::reader::FieldReader;
use crate::catalog::{CatalogProvider, CatalogSnapshot};
use crate::generator::{GenerationError, GeneratorAdapter};
use crate::model::{CalculatedFieldDefinition, FieldCandidate, ScopeId};
use crate::semantic::{RegenerationEngine, SemanticViewDefinition};
use crate::store::{self, DeprecateOutcome, FieldStore, PutOutcome};
use crate::validation::{Admission, Validator};

/// Result of the steps before the store write.
enum Prepared {
    Admitted(Admission),
    GenerationFailed(GenerationError),
}

/// Drives one request from draft to published view.
///
/// ```text
/// request ─▶ generate ─▶ validate ─┬─▶ store write ─▶ regenerate ─▶ ack
///                                  └─▶ Rejected (audit record only)
/// ```
///
/// Everything up to the store write races the caller's cancellation token.
/// Once the write has committed, regeneration runs to completion on its own
/// task even if the caller goes away.
pub struct FieldPipeline {
    catalog: Arc<dyn CatalogProvider>,
    store: Arc<dyn FieldStore>,
    generator: Option<Arc<GeneratorAdapter>>,
    validator: Validator,
    regeneration: Arc<RegenerationEngine>,
}

impl FieldPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn FieldStore>,
        validator: Validator,
        regeneration: Arc<RegenerationEngine>,
    ) -> Self {
        Self {
            catalog,
            store,
            generator: None,
            validator,
            regeneration,
        }
    }

    pub fn with_generator(mut self, generator: Arc<GeneratorAdapter>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// A handle with read and generate access only.
    pub fn reader(&self) -> FieldReader {
        FieldReader::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.store),
            self.generator.clone(),
            self.validator.clone(),
            Arc::clone(&self.regeneration),
        )
    }

    pub fn regeneration(&self) -> &Arc<RegenerationEngine> {
        &self.regeneration
    }

    /// Generate, validate, persist and publish a field from a natural-language
    /// request.
    pub async fn create_field(
        &self,
        request: FieldRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutcome> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(PipelineError::GeneratorNotConfigured)?;
        let FieldRequest {
            scope,
            request,
            created_by,
            expected_version,
        } = request;

        let prepare = self.generate_and_admit(generator, &scope, &request, &created_by);

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(&scope)),
            prepared = prepare => prepared?,
        };
        self.finish(&scope, prepared, expected_version, cancel).await
    }

    /// Run an operator-supplied candidate through validation, persistence and
    /// publication.
    pub async fn submit_candidate(
        &self,
        scope: &ScopeId,
        candidate: FieldCandidate,
        created_by: &str,
        expected_version: Option<u64>,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutcome> {
        let prepare = self.snapshot_and_admit(scope, candidate, created_by);

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(scope)),
            prepared = prepare => prepared?,
        };
        self.finish(scope, prepared, expected_version, cancel).await
    }

    /// Soft-delete a field at `expected_version` and publish the view without
    /// it.
    pub async fn deprecate(
        &self,
        scope: &ScopeId,
        name: &str,
        expected_version: u64,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeprecationOutcome> {
        if cancel.is_cancelled() {
            debug!(scope = %scope, name, "deprecation cancelled before write");
            return Ok(DeprecationOutcome::Cancelled);
        }

        let (write_scope, write_name) = (scope.clone(), name.to_string());
        let written = store::blocking(&self.store, move |store| {
            store.deprecate(&write_scope, &write_name, expected_version)
        })
        .await?;

        match written {
            DeprecateOutcome::Deprecated(definition) => {
                debug!(scope = %scope, name = %definition.name, "regenerating after deprecation");
                let (view, published) = self.publish(scope).await;
                Ok(DeprecationOutcome::Deprecated {
                    definition,
                    view,
                    published,
                })
            }
            DeprecateOutcome::NotFound => Ok(DeprecationOutcome::NotFound),
            DeprecateOutcome::Conflict { kind, current } => {
                Ok(DeprecationOutcome::Conflict { kind, current })
            }
        }
    }

    async fn generate_and_admit(
        &self,
        generator: &GeneratorAdapter,
        scope: &ScopeId,
        request: &str,
        created_by: &str,
    ) -> PipelineResult<Prepared> {
        let catalog = self.catalog.snapshot(scope).await?;
        debug!(scope = %scope, catalog_version = catalog.version, "generating candidate");
        match generator.generate(scope, request, &catalog).await {
            Ok(candidate) => self.admit(scope, candidate, created_by, &catalog).await,
            Err(e) => Ok(Prepared::GenerationFailed(e)),
        }
    }

    async fn snapshot_and_admit(
        &self,
        scope: &ScopeId,
        candidate: FieldCandidate,
        created_by: &str,
    ) -> PipelineResult<Prepared> {
        let catalog = self.catalog.snapshot(scope).await?;
        self.admit(scope, candidate, created_by, &catalog).await
    }

    async fn admit(
        &self,
        scope: &ScopeId,
        candidate: FieldCandidate,
        created_by: &str,
        catalog: &CatalogSnapshot,
    ) -> PipelineResult<Prepared> {
        let draft = CalculatedFieldDefinition::draft(scope.clone(), candidate, created_by);
        debug!(scope = %scope, name = %draft.name, "validating draft");
        Ok(Prepared::Admitted(self.validator.admit(draft, catalog).await?))
    }

    async fn finish(
        &self,
        scope: &ScopeId,
        prepared: Prepared,
        expected_version: Option<u64>,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineOutcome> {
        let field = match prepared {
            Prepared::GenerationFailed(e) => return Ok(PipelineOutcome::GenerationFailed(e)),
            Prepared::Admitted(Admission::Rejected { draft, result }) => {
                info!(scope = %scope, name = %draft.name, codes = ?result.codes(), "draft rejected");
                let (audit, errors) = (draft.clone(), result.errors.clone());
                let recorded =
                    store::blocking(&self.store, move |store| store.record_rejection(&audit, &errors)).await;
                if let Err(e) = recorded {
                    warn!(scope = %scope, name = %draft.name, error = %e, "failed to record rejected draft");
                }
                return Ok(PipelineOutcome::Rejected {
                    definition: draft,
                    result,
                });
            }
            Prepared::Admitted(Admission::Validated { field, .. }) => field,
        };

        // Last point at which cancellation is honoured.
        if cancel.is_cancelled() {
            return Ok(cancelled(scope));
        }

        let written = store::blocking(&self.store, move |store| {
            store.put_if_absent_or_same_version(field, expected_version)
        })
        .await?;

        match written {
            PutOutcome::Persisted {
                definition,
                changed,
            } => {
                let (view, published) = self.publish(scope).await;
                Ok(PipelineOutcome::Created {
                    definition,
                    changed,
                    view,
                    published,
                })
            }
            PutOutcome::Conflict { kind, current } => Ok(PipelineOutcome::Conflict { kind, current }),
        }
    }

    /// Regenerate after a committed write.
    ///
    /// Runs on its own task so dropping the caller's future cannot stop it.
    async fn publish(&self, scope: &ScopeId) -> (Option<Arc<SemanticViewDefinition>>, bool) {
        let engine = Arc::clone(&self.regeneration);
        let task_scope = scope.clone();
        let handle = tokio::spawn(async move { engine.regenerate(&task_scope).await });

        match handle.await {
            Ok(Ok(view)) => (Some(view), true),
            Ok(Err(e)) => {
                error!(scope = %scope, error = %e, "field persisted but the semantic view was not republished");
                (self.regeneration.current(scope), false)
            }
            Err(e) => {
                error!(scope = %scope, error = %e, "regeneration task failed");
                (self.regeneration.current(scope), false)
            }
        }
    }
}

fn cancelled(scope: &ScopeId) -> PipelineOutcome {
    debug!(scope = %scope, "request cancelled before write");
    PipelineOutcome::Cancelled
}
