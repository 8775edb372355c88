//! Read-only access for the orchestration layer.

use std::sync::Arc;

use crate::catalog::CatalogProvider;
use crate::generator::{GenerationError, GeneratorAdapter};
use crate::model::{CalculatedFieldDefinition, FieldCandidate, ScopeId};
use crate::semantic::{RegenerationEngine, SemanticViewDefinition};
use crate::store::{FieldStore, StoreResult};
use crate::tools::ToolDescriptorSet;
use crate::validation::{ValidationResult, Validator};

use super::outcome::{PipelineError, PipelineResult};

/// A generated candidate with its validation result. Never persisted.
#[derive(Debug)]
pub enum Preview {
    Candidate {
        candidate: FieldCandidate,
        result: ValidationResult,
    },
    GenerationFailed(GenerationError),
}

/// Read and generate operations over the pipeline's state.
///
/// Has no method that writes: the store handle is private and only its
/// read methods are reachable.
#[derive(Clone)]
pub struct FieldReader {
    catalog: Arc<dyn CatalogProvider>,
    store: Arc<dyn FieldStore>,
    generator: Option<Arc<GeneratorAdapter>>,
    validator: Validator,
    regeneration: Arc<RegenerationEngine>,
}

impl FieldReader {
    pub(crate) fn new(
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn FieldStore>,
        generator: Option<Arc<GeneratorAdapter>>,
        validator: Validator,
        regeneration: Arc<RegenerationEngine>,
    ) -> Self {
        Self {
            catalog,
            store,
            generator,
            validator,
            regeneration,
        }
    }

    pub fn list_active(&self, scope: &ScopeId) -> StoreResult<Vec<CalculatedFieldDefinition>> {
        Ok(self.store.list_active(scope)?.fields)
    }

    pub fn get(&self, scope: &ScopeId, name: &str) -> StoreResult<Option<CalculatedFieldDefinition>> {
        self.store.get(scope, name)
    }

    pub fn view(&self, scope: &ScopeId) -> Option<Arc<SemanticViewDefinition>> {
        self.regeneration.current(scope)
    }

    pub fn export_tools(&self, scope: &ScopeId) -> ToolDescriptorSet {
        self.regeneration.tools().export(scope)
    }

    /// Generate and validate a candidate without persisting it.
    pub async fn preview(&self, scope: &ScopeId, request: &str) -> PipelineResult<Preview> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(PipelineError::GeneratorNotConfigured)?;
        let catalog = self.catalog.snapshot(scope).await?;

        let candidate = match generator.generate(scope, request, &catalog).await {
            Ok(candidate) => candidate,
            Err(e) => return Ok(Preview::GenerationFailed(e)),
        };
        let draft = CalculatedFieldDefinition::draft(scope.clone(), candidate.clone(), "preview");
        let result = self.validator.validate(&draft, &catalog).await;
        Ok(Preview::Candidate { candidate, result })
    }
}
