//! The view regeneration engine.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::error::{RegenerationError, RegenerationResult};
use super::view::SemanticViewDefinition;
use crate::catalog::{CatalogProvider, CatalogSnapshot};
use crate::model::{CalculatedFieldDefinition, ScopeId};
use crate::probe::{ProbeEngine, ProbeQuery, ProbeVerdict};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{self, FieldStore};
use crate::tools::ToolExporter;

/// Last failed regeneration of a scope, kept for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationFailure {
    pub scope_id: ScopeId,
    pub code: String,
    pub message: String,
    /// Store version the failed attempt read, if it got that far.
    pub store_read_version: Option<u64>,
    pub failed_at: DateTime<Utc>,
}

/// Published view of one scope.
///
/// Readers load the pointer without locking. Writers serialise on `publish`
/// only to compare read versions before the swap.
#[derive(Default)]
struct ViewSlot {
    current: ArcSwapOption<SemanticViewDefinition>,
    publish: Mutex<()>,
}

impl ViewSlot {
    /// Install `view` unless a view built from a later store read is already
    /// published. Returns the view that is current afterwards.
    ///
    /// `on_install` runs under the publish lock, so followers of the slot see
    /// installs in the same order as readers do.
    fn publish(
        &self,
        view: SemanticViewDefinition,
        on_install: impl FnOnce(&SemanticViewDefinition),
    ) -> (Arc<SemanticViewDefinition>, bool) {
        let _guard = self.publish.lock();
        if let Some(current) = self.current.load_full() {
            if current.store_read_version > view.store_read_version {
                return (current, false);
            }
        }
        let view = Arc::new(view);
        self.current.store(Some(Arc::clone(&view)));
        on_install(view.as_ref());
        (view, true)
    }
}

/// Rebuilds and publishes semantic views.
///
/// ```text
/// catalog snapshot ─┐
///                   ├─▶ fold ─▶ collision check ─▶ reference check ─▶ merged probe ─▶ swap
/// list_active ──────┘
/// ```
///
/// A failed regeneration leaves the previously published view in place.
pub struct RegenerationEngine {
    catalog: Arc<dyn CatalogProvider>,
    store: Arc<dyn FieldStore>,
    probe: Option<(Arc<dyn ProbeEngine>, RetryPolicy)>,
    tools: Arc<ToolExporter>,
    views: DashMap<ScopeId, Arc<ViewSlot>>,
    failures: DashMap<ScopeId, RegenerationFailure>,
}

impl RegenerationEngine {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn FieldStore>,
        tools: Arc<ToolExporter>,
    ) -> Self {
        Self {
            catalog,
            store,
            probe: None,
            tools,
            views: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Probe the merged view with a zero-row query before publishing it.
    pub fn with_probe(mut self, engine: Arc<dyn ProbeEngine>, retry: RetryPolicy) -> Self {
        self.probe = Some((engine, retry));
        self
    }

    /// Rebuild the view of `scope` and publish it.
    ///
    /// Returns the view that is current once this call completes, which may
    /// be a newer one published concurrently.
    pub async fn regenerate(&self, scope: &ScopeId) -> RegenerationResult<Arc<SemanticViewDefinition>> {
        let mut read_version = None;
        let result = self.rebuild(scope, &mut read_version).await;

        match result {
            Ok(view) => {
                let generation = view.generation_version;
                let store_read_version = view.store_read_version;
                let (current, installed) = self.slot(scope).publish(view, |view| {
                    self.tools.refresh(view);
                });
                self.failures.remove(scope);

                if installed {
                    info!(scope = %scope, generation, store_read_version, fields = current.calculated_fields.len(), "semantic view published");
                } else {
                    debug!(scope = %scope, store_read_version, newer = current.store_read_version, "newer view already published");
                }
                Ok(current)
            }
            Err(e) => {
                error!(scope = %scope, code = e.code(), error = %e, "regeneration failed, previous view kept");
                self.failures.insert(
                    scope.clone(),
                    RegenerationFailure {
                        scope_id: scope.clone(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                        store_read_version: read_version,
                        failed_at: Utc::now(),
                    },
                );
                Err(e)
            }
        }
    }

    /// The published view of `scope`, if any.
    pub fn current(&self, scope: &ScopeId) -> Option<Arc<SemanticViewDefinition>> {
        self.views.get(scope).and_then(|slot| slot.current.load_full())
    }

    pub fn last_failure(&self, scope: &ScopeId) -> Option<RegenerationFailure> {
        self.failures.get(scope).map(|f| f.clone())
    }

    pub fn tools(&self) -> &Arc<ToolExporter> {
        &self.tools
    }

    fn slot(&self, scope: &ScopeId) -> Arc<ViewSlot> {
        Arc::clone(self.views.entry(scope.clone()).or_default().value())
    }

    async fn rebuild(
        &self,
        scope: &ScopeId,
        read_version: &mut Option<u64>,
    ) -> RegenerationResult<SemanticViewDefinition> {
        let catalog = self.catalog.snapshot(scope).await?;
        let read_scope = scope.clone();
        let active = store::blocking(&self.store, move |store| store.list_active(&read_scope)).await?;
        *read_version = Some(active.read_version);
        debug!(scope = %scope, read_version = active.read_version, fields = active.fields.len(), "folding active fields");

        check_collisions(&catalog, &active.fields)?;
        check_references(&catalog, &active.fields)?;
        self.probe_merged(&catalog, &active.fields).await?;

        Ok(SemanticViewDefinition::fold(&catalog, &active.fields, active.read_version))
    }

    async fn probe_merged(
        &self,
        catalog: &CatalogSnapshot,
        fields: &[CalculatedFieldDefinition],
    ) -> RegenerationResult<()> {
        let (Some((engine, retry)), Some(relation)) = (&self.probe, &catalog.relation) else {
            return Ok(());
        };
        if fields.is_empty() {
            return Ok(());
        }

        let query = ProbeQuery::zero_row(
            relation,
            engine.driver(),
            fields.iter().map(|f| f.expression_text.trim()),
        )?;
        let query = &query;
        let engine = engine.as_ref();
        let outcome = with_retry(retry, "merged view probe", move || engine.probe(query)).await;

        match outcome.result? {
            ProbeVerdict::Accepted => Ok(()),
            ProbeVerdict::Rejected { message } => Err(RegenerationError::EngineRejected { message }),
        }
    }
}

fn check_collisions(
    catalog: &CatalogSnapshot,
    fields: &[CalculatedFieldDefinition],
) -> RegenerationResult<()> {
    let colliding: Vec<String> = fields
        .iter()
        .filter(|f| catalog.contains(&f.name))
        .map(|f| f.name.clone())
        .collect();

    if colliding.is_empty() {
        Ok(())
    } else {
        Err(RegenerationError::NameCollisionWithBaseColumn { fields: colliding })
    }
}

fn check_references(
    catalog: &CatalogSnapshot,
    fields: &[CalculatedFieldDefinition],
) -> RegenerationResult<()> {
    for field in fields {
        if let Some(column) = field.referenced_columns.iter().find(|c| !catalog.contains(c)) {
            return Err(RegenerationError::DanglingReference {
                field: field.name.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}
