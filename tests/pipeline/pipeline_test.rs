use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fieldforge::catalog::{CatalogProvider, SourceRelation, StaticCatalogProvider};
use fieldforge::config::Driver;
use fieldforge::generator::GeneratorAdapter;
use fieldforge::model::{DataType, FieldCandidate, FieldStatus};
use fieldforge::pipeline::{
    DeprecationOutcome, FieldPipeline, FieldRequest, PipelineError, PipelineOutcome, Preview,
};
use fieldforge::retry::RetryPolicy;
use fieldforge::semantic::RegenerationEngine;
use fieldforge::store::{ConflictKind, FieldStore, SqliteFieldStore};
use fieldforge::testing::fixtures::{credit_catalog, credit_columns, credit_scope, CREDIT_RELATION};
use fieldforge::testing::{ScriptedCompletion, ScriptedProbe};
use fieldforge::tools::ToolExporter;
use fieldforge::validation::{ValidationCode, Validator};

const EBITDA_X_LEVERAGE: &str = r#"{"name": "EBITDA_X_LEVERAGE", "displayName": "EBITDA x Leverage", "expr": "LTM_EBITDA * TOTAL_LEVERAGE", "type": "NUMBER"}"#;
const INJECTION: &str = r#"{"name": "EVIL", "displayName": "Evil", "expr": "LTM_EBITDA; DROP TABLE DIM_CREDIT", "type": "NUMBER"}"#;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        multiplier: 2.0,
        timeout_ms: 2_000,
    }
}

struct Harness {
    catalog: Arc<StaticCatalogProvider>,
    store: Arc<SqliteFieldStore>,
    probe: Arc<ScriptedProbe>,
    completion: Arc<ScriptedCompletion>,
    pipeline: FieldPipeline,
}

impl Harness {
    fn new(completion: ScriptedCompletion) -> Self {
        Self::with_probe(completion, ScriptedProbe::new(Driver::Snowflake))
    }

    fn with_probe(completion: ScriptedCompletion, probe: ScriptedProbe) -> Self {
        let catalog = Arc::new(credit_catalog());
        let store = Arc::new(SqliteFieldStore::open_in_memory().unwrap());
        let probe = Arc::new(probe);
        let completion = Arc::new(completion);

        let catalog_dyn: Arc<dyn CatalogProvider> = catalog.clone();
        let store_dyn: Arc<dyn FieldStore> = store.clone();
        let regeneration = RegenerationEngine::new(
            catalog_dyn.clone(),
            store_dyn.clone(),
            Arc::new(ToolExporter::new()),
        )
        .with_probe(probe.clone(), fast_retry());
        let generator = GeneratorAdapter::new(completion.clone(), fast_retry());

        let pipeline = FieldPipeline::new(
            catalog_dyn,
            store_dyn,
            Validator::with_probe(probe.clone(), fast_retry()),
            Arc::new(regeneration),
        )
        .with_generator(Arc::new(generator));

        Self {
            catalog,
            store,
            probe,
            completion,
            pipeline,
        }
    }

    async fn create(&self, request: &str) -> PipelineOutcome {
        self.pipeline
            .create_field(
                FieldRequest::new(credit_scope(), request, "analyst"),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    async fn submit(&self, name: &str, expr: &str, by: &str, expected: Option<u64>) -> PipelineOutcome {
        self.pipeline
            .submit_candidate(
                &credit_scope(),
                FieldCandidate::new(name, expr),
                by,
                expected,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_scenario_end_to_end() {
    let harness = Harness::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));

    let outcome = harness.create("multiply LTM EBITDA by Total Leverage").await;

    let PipelineOutcome::Created {
        definition,
        changed,
        view,
        published,
    } = outcome
    else {
        panic!("expected Created, got {outcome:?}");
    };
    assert!(changed && published);
    assert_eq!(definition.name, "EBITDA_X_LEVERAGE");
    assert_eq!(definition.version, 1);
    assert_eq!(definition.status, FieldStatus::Persisted);
    assert_eq!(definition.result_type, DataType::Number);

    // Acknowledged means already visible.
    let view = view.unwrap();
    assert!(view.contains_field("EBITDA_X_LEVERAGE"));
    let reader = harness.pipeline.reader();
    assert!(Arc::ptr_eq(&view, &reader.view(&credit_scope()).unwrap()));

    let tools = reader.export_tools(&credit_scope());
    assert!(tools.tools.is_empty());
    assert_eq!(tools.calculated_fields[0].name, "EBITDA_X_LEVERAGE");

    // One validation probe, one merged-view probe.
    assert_eq!(harness.probe.submitted().len(), 2);
}

#[tokio::test]
async fn test_unknown_column_writes_nothing() {
    let harness = Harness::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));
    let mut columns = credit_columns();
    columns.retain(|c| c.name != "TOTAL_LEVERAGE");
    harness
        .catalog
        .register(credit_scope(), SourceRelation::parse(CREDIT_RELATION), columns)
        .unwrap();

    let outcome = harness.create("multiply LTM EBITDA by Total Leverage").await;

    let PipelineOutcome::Rejected { definition, result } = outcome else {
        panic!("expected Rejected, got {outcome:?}");
    };
    assert_eq!(definition.status, FieldStatus::Rejected);
    assert_eq!(result.codes(), vec![ValidationCode::UnknownColumn]);
    assert!(result.errors[0].message.contains("TOTAL_LEVERAGE"));

    assert!(harness.store.get(&credit_scope(), "EBITDA_X_LEVERAGE").unwrap().is_none());
    assert!(harness.pipeline.regeneration().current(&credit_scope()).is_none());
    assert!(harness.probe.submitted().is_empty());
    assert_eq!(harness.store.list_rejections(&credit_scope()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_injection_is_terminal() {
    let harness = Harness::new(ScriptedCompletion::always(INJECTION));

    let outcome = harness.create("anything").await;

    let PipelineOutcome::Rejected { result, .. } = outcome else {
        panic!("expected Rejected, got {outcome:?}");
    };
    assert!(result.codes().iter().all(|c| *c == ValidationCode::ForbiddenConstruct));
    assert_eq!(result.errors[0].position, Some(10));
    assert!(result.is_terminal());
    assert_eq!(harness.completion.calls(), 1);
    assert!(harness.probe.submitted().is_empty());
    assert!(harness.store.list_active(&credit_scope()).unwrap().fields.is_empty());
}

#[tokio::test]
async fn test_generation_failure_surfaces() {
    let harness = Harness::new(ScriptedCompletion::always("no idea"));
    let outcome = harness.create("anything").await;
    assert!(matches!(outcome, PipelineOutcome::GenerationFailed(_)));
    assert!(harness.store.scopes().unwrap().is_empty());
}

#[tokio::test]
async fn test_name_conflict_surfaces() {
    let harness = Harness::new(ScriptedCompletion::new());

    assert!(harness.submit("NET", "LTM_EBITDA - 1", "alice", None).await.is_created());
    let outcome = harness.submit("NET", "LTM_EBITDA - 2", "bob", None).await;

    let PipelineOutcome::Conflict { kind, current } = outcome else {
        panic!("expected Conflict, got {outcome:?}");
    };
    assert_eq!(kind, ConflictKind::NameAlreadyExists);
    assert_eq!(current.unwrap().created_by, "alice");
}

#[tokio::test]
async fn test_replay_and_replace() {
    let harness = Harness::new(ScriptedCompletion::new());

    assert!(harness.submit("NET", "LTM_EBITDA - 1", "alice", None).await.is_created());
    let replay = harness.submit("NET", "LTM_EBITDA - 1", "alice", Some(1)).await;
    assert!(matches!(
        replay,
        PipelineOutcome::Created {
            changed: false,
            ref definition,
            ..
        } if definition.version == 1
    ));

    let replaced = harness.submit("NET", "LTM_EBITDA - 2", "alice", Some(1)).await;
    let PipelineOutcome::Created { definition, view, .. } = replaced else {
        panic!("expected Created, got {replaced:?}");
    };
    assert_eq!(definition.version, 2);
    assert_eq!(view.unwrap().field("NET").unwrap().expression, "LTM_EBITDA - 2");

    let stale = harness.submit("NET", "LTM_EBITDA - 3", "alice", Some(1)).await;
    assert!(matches!(
        stale,
        PipelineOutcome::Conflict {
            kind: ConflictKind::StaleVersion,
            ..
        }
    ));
}

#[tokio::test]
async fn test_deprecate_republishes() {
    let harness = Harness::new(ScriptedCompletion::new());
    let PipelineOutcome::Created { view: Some(before), .. } =
        harness.submit("NET", "LTM_EBITDA - 1", "alice", None).await
    else {
        panic!("expected Created with a view");
    };

    let outcome = harness
        .pipeline
        .deprecate(&credit_scope(), "NET", 1, &CancellationToken::new())
        .await
        .unwrap();

    let DeprecationOutcome::Deprecated { definition, view, published } = outcome else {
        panic!("expected Deprecated, got {outcome:?}");
    };
    assert!(published);
    assert_eq!(definition.status, FieldStatus::Deprecated);
    assert!(!view.unwrap().contains_field("NET"));
    // A reader still holding the previous view sees it unchanged.
    assert!(before.contains_field("NET"));

    let stale = harness
        .pipeline
        .deprecate(&credit_scope(), "NET", 5, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(stale, DeprecationOutcome::Conflict { .. }));
}

#[tokio::test]
async fn test_regeneration_failure_keeps_write() {
    let harness = Harness::new(ScriptedCompletion::new());
    harness.submit("DOUBLED", "LTM_EBITDA * 2", "alice", None).await;

    // Shadows a base column: valid field, invalid view.
    let outcome = harness.submit("BORROWER", "UPPER(BORROWER)", "alice", None).await;

    let PipelineOutcome::Created { definition, view, published, .. } = outcome else {
        panic!("expected Created, got {outcome:?}");
    };
    assert!(!published);
    assert_eq!(definition.status, FieldStatus::Persisted);
    let view = view.unwrap();
    assert!(view.contains_field("DOUBLED"));
    assert!(!view.contains_field("BORROWER"));

    assert!(harness.store.get(&credit_scope(), "BORROWER").unwrap().is_some());
    let failure = harness.pipeline.regeneration().last_failure(&credit_scope()).unwrap();
    assert_eq!(failure.code, "NameCollisionWithBaseColumn");
}

#[tokio::test]
async fn test_cancelled_before_start_is_noop() {
    let harness = Harness::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness
        .pipeline
        .create_field(FieldRequest::new(credit_scope(), "anything", "analyst"), &cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, PipelineOutcome::Cancelled));
    assert_eq!(harness.completion.calls(), 0);
    assert!(harness.store.scopes().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_during_generation_is_noop() {
    let harness = Harness::new(
        ScriptedCompletion::always(EBITDA_X_LEVERAGE).with_delay(Duration::from_millis(500)),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = harness
        .pipeline
        .create_field(FieldRequest::new(credit_scope(), "anything", "analyst"), &cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, PipelineOutcome::Cancelled));
    assert_eq!(harness.completion.calls(), 1);
    assert!(harness.store.get(&credit_scope(), "EBITDA_X_LEVERAGE").unwrap().is_none());
    assert!(harness.probe.submitted().is_empty());
}

#[tokio::test]
async fn test_deprecate_cancelled_is_noop() {
    let harness = Harness::new(ScriptedCompletion::new());
    harness.submit("NET", "LTM_EBITDA - 1", "alice", None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness.pipeline.deprecate(&credit_scope(), "NET", 1, &cancel).await.unwrap();
    assert!(matches!(outcome, DeprecationOutcome::Cancelled));
    assert!(harness.store.get(&credit_scope(), "NET").unwrap().unwrap().is_active());
}

#[tokio::test]
async fn test_generator_required_for_requests() {
    let catalog: Arc<dyn CatalogProvider> = Arc::new(credit_catalog());
    let store: Arc<dyn FieldStore> = Arc::new(SqliteFieldStore::open_in_memory().unwrap());
    let regeneration = RegenerationEngine::new(catalog.clone(), store.clone(), Arc::new(ToolExporter::new()));
    let validator = Validator::with_probe(Arc::new(ScriptedProbe::new(Driver::Snowflake)), fast_retry());
    let pipeline = FieldPipeline::new(catalog, store, validator, Arc::new(regeneration));

    let err = pipeline
        .create_field(FieldRequest::new(credit_scope(), "anything", "analyst"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::GeneratorNotConfigured));
}

#[tokio::test]
async fn test_without_engine_nothing_is_persisted() {
    let catalog: Arc<dyn CatalogProvider> = Arc::new(credit_catalog());
    let store = Arc::new(SqliteFieldStore::open_in_memory().unwrap());
    let store_dyn: Arc<dyn FieldStore> = store.clone();
    let regeneration = RegenerationEngine::new(catalog.clone(), store_dyn.clone(), Arc::new(ToolExporter::new()));
    let pipeline = FieldPipeline::new(catalog, store_dyn, Validator::without_engine(), Arc::new(regeneration));

    let outcome = pipeline
        .submit_candidate(
            &credit_scope(),
            FieldCandidate::new("DOUBLED", "LTM_EBITDA * 2"),
            "analyst",
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let PipelineOutcome::Rejected { definition, result } = outcome else {
        panic!("expected Rejected, got {outcome:?}");
    };
    assert_eq!(definition.status, FieldStatus::Rejected);
    assert_eq!(result.codes(), vec![ValidationCode::EngineUnavailable]);
    assert!(store.get(&credit_scope(), "DOUBLED").unwrap().is_none());
    assert!(pipeline.regeneration().current(&credit_scope()).is_none());
}

#[tokio::test]
async fn test_preview_writes_nothing() {
    let harness = Harness::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));
    let reader = harness.pipeline.reader();

    let preview = reader.preview(&credit_scope(), "multiply LTM EBITDA by Total Leverage").await.unwrap();

    let Preview::Candidate { candidate, result } = preview else {
        panic!("expected a candidate");
    };
    assert_eq!(candidate.name, "EBITDA_X_LEVERAGE");
    assert!(result.ok);
    assert!(reader.list_active(&credit_scope()).unwrap().is_empty());
    assert!(reader.view(&credit_scope()).is_none());
}
