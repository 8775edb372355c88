use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fieldforge::catalog::CatalogProvider;
use fieldforge::config::Driver;
use fieldforge::model::{CalculatedFieldDefinition, FieldCandidate, ScopeId, ValidatedField};
use fieldforge::pipeline::{FieldPipeline, PipelineOutcome};
use fieldforge::retry::RetryPolicy;
use fieldforge::semantic::RegenerationEngine;
use fieldforge::store::{
    ActiveSnapshot, ConflictKind, DeprecateOutcome, FieldStore, PutOutcome, RejectionRecord, SqliteFieldStore,
    StoreResult,
};
use fieldforge::testing::fixtures::{credit_catalog, credit_scope};
use fieldforge::testing::ScriptedProbe;
use fieldforge::tools::ToolExporter;
use fieldforge::validation::{ValidationIssue, Validator};

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        multiplier: 1.0,
        timeout_ms: 2_000,
    }
}

fn setup(probe: ScriptedProbe) -> (Arc<FieldPipeline>, Arc<SqliteFieldStore>) {
    let catalog: Arc<dyn CatalogProvider> = Arc::new(credit_catalog());
    let store = Arc::new(SqliteFieldStore::open_in_memory().unwrap());
    let store_dyn: Arc<dyn FieldStore> = store.clone();
    // The validator gets its own engine so each scripted delay lands on a
    // regeneration.
    let regeneration = RegenerationEngine::new(catalog.clone(), store_dyn.clone(), Arc::new(ToolExporter::new()))
        .with_probe(Arc::new(probe), retry());
    let validator = Validator::with_probe(Arc::new(ScriptedProbe::new(Driver::Snowflake)), retry());
    let pipeline = FieldPipeline::new(catalog, store_dyn, validator, Arc::new(regeneration));
    (Arc::new(pipeline), store)
}

/// A store whose writes hold the calling thread.
struct SlowStore {
    inner: SqliteFieldStore,
    delay: Duration,
}

impl FieldStore for SlowStore {
    fn put_if_absent_or_same_version(
        &self,
        field: ValidatedField,
        expected_version: Option<u64>,
    ) -> StoreResult<PutOutcome> {
        std::thread::sleep(self.delay);
        self.inner.put_if_absent_or_same_version(field, expected_version)
    }

    fn list_active(&self, scope: &ScopeId) -> StoreResult<ActiveSnapshot> {
        self.inner.list_active(scope)
    }

    fn deprecate(&self, scope: &ScopeId, name: &str, expected_version: u64) -> StoreResult<DeprecateOutcome> {
        std::thread::sleep(self.delay);
        self.inner.deprecate(scope, name, expected_version)
    }

    fn get(&self, scope: &ScopeId, name: &str) -> StoreResult<Option<CalculatedFieldDefinition>> {
        self.inner.get(scope, name)
    }

    fn record_rejection(&self, draft: &CalculatedFieldDefinition, errors: &[ValidationIssue]) -> StoreResult<()> {
        self.inner.record_rejection(draft, errors)
    }

    fn list_rejections(&self, scope: &ScopeId) -> StoreResult<Vec<RejectionRecord>> {
        self.inner.list_rejections(scope)
    }

    fn scopes(&self) -> StoreResult<Vec<ScopeId>> {
        self.inner.scopes()
    }
}

async fn submit(pipeline: &FieldPipeline, name: &str, expr: &str, by: &str) -> PipelineOutcome {
    pipeline
        .submit_candidate(
            &credit_scope(),
            FieldCandidate::new(name, expr),
            by,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_name_single_winner() {
    let (pipeline, store) = setup(ScriptedProbe::new(Driver::Snowflake));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let expr = format!("LTM_EBITDA * {}", i + 1);
                submit(&pipeline, "SCALED", &expr, &format!("author-{i}")).await
            })
        })
        .collect();

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            PipelineOutcome::Created { changed: true, .. } => created += 1,
            PipelineOutcome::Conflict {
                kind: ConflictKind::NameAlreadyExists,
                ..
            } => conflicts += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!((created, conflicts), (1, 7));

    let stored = store.get(&credit_scope(), "SCALED").unwrap().unwrap();
    assert_eq!(stored.version, 1);
    let view = pipeline.regeneration().current(&credit_scope()).unwrap();
    assert_eq!(view.field("SCALED").unwrap().expression, stored.expression_text);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_names_all_published() {
    let (pipeline, store) = setup(ScriptedProbe::new(Driver::Snowflake));

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                submit(&pipeline, &format!("FIELD_{i}"), "LTM_EBITDA + 1", "analyst").await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_created());
    }

    // Whichever regeneration finished last read every write.
    let view = pipeline.regeneration().current(&credit_scope()).unwrap();
    let snapshot = store.list_active(&credit_scope()).unwrap();
    assert_eq!(view.store_read_version, snapshot.read_version);
    assert_eq!(view.field_names().len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_after_write_still_publishes() {
    let probe = ScriptedProbe::new(Driver::Snowflake).then_delay(Duration::from_millis(300));
    let (pipeline, store) = setup(probe);
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline
                .submit_candidate(
                    &credit_scope(),
                    FieldCandidate::new("SLOW", "LTM_EBITDA / 2"),
                    "analyst",
                    None,
                    &cancel,
                )
                .await
        })
    };

    // Wait for the write, then cancel while regeneration is in flight.
    for _ in 0..200 {
        if store.get(&credit_scope(), "SLOW").unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(store.get(&credit_scope(), "SLOW").unwrap().is_some());
    cancel.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, PipelineOutcome::Created { published: true, .. }));
    assert!(pipeline.regeneration().current(&credit_scope()).unwrap().contains_field("SLOW"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_caller_still_publishes() {
    let probe = ScriptedProbe::new(Driver::Snowflake).then_delay(Duration::from_millis(300));
    let (pipeline, store) = setup(probe);

    let task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { submit(&pipeline, "SLOW", "LTM_EBITDA / 2", "analyst").await })
    };

    for _ in 0..200 {
        if store.get(&credit_scope(), "SLOW").unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();

    let mut published = false;
    for _ in 0..200 {
        if let Some(view) = pipeline.regeneration().current(&credit_scope()) {
            published = view.contains_field("SLOW");
            if published {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(published);
}

// Single-threaded runtime: a store write on the runtime thread would starve
// every other task for the whole write.
#[tokio::test]
async fn test_slow_store_write_does_not_stall_runtime() {
    let catalog: Arc<dyn CatalogProvider> = Arc::new(credit_catalog());
    let store: Arc<dyn FieldStore> = Arc::new(SlowStore {
        inner: SqliteFieldStore::open_in_memory().unwrap(),
        delay: Duration::from_millis(200),
    });
    let regeneration = RegenerationEngine::new(catalog.clone(), store.clone(), Arc::new(ToolExporter::new()));
    let validator = Validator::with_probe(Arc::new(ScriptedProbe::new(Driver::Snowflake)), retry());
    let pipeline = FieldPipeline::new(catalog, store, validator, Arc::new(regeneration));

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = Arc::clone(&ticks);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    let outcome = submit(&pipeline, "NET", "LTM_EBITDA - 1", "analyst").await;
    ticker.abort();

    assert!(outcome.is_created());
    let ticks = ticks.load(Ordering::Relaxed);
    assert!(ticks >= 10, "runtime stalled during the write: {ticks} ticks");
}
