use std::sync::Arc;

use fieldforge::catalog::{CatalogProvider, SourceRelation, StaticCatalogProvider};
use fieldforge::config::Driver;
use fieldforge::model::{CalculatedFieldDefinition, DataType, FieldCandidate, ScopeId};
use fieldforge::retry::RetryPolicy;
use fieldforge::semantic::{RegenerationEngine, RegenerationError};
use fieldforge::store::{FieldStore, SqliteFieldStore};
use fieldforge::testing::fixtures::{credit_catalog, credit_columns, credit_scope, credit_snapshot, CREDIT_RELATION};
use fieldforge::testing::ScriptedProbe;
use fieldforge::tools::{FunctionDescriptor, ToolExporter};
use fieldforge::validation::{Admission, Validator};

struct Harness {
    catalog: Arc<StaticCatalogProvider>,
    store: Arc<SqliteFieldStore>,
    tools: Arc<ToolExporter>,
}

impl Harness {
    fn new() -> Self {
        let tools = ToolExporter::new();
        tools
            .register_function(
                FunctionDescriptor::new("PD_FROM_RATING", "Probability of default", DataType::Number)
                    .with_input("rating", DataType::Varchar),
            )
            .unwrap();
        Self {
            catalog: Arc::new(credit_catalog()),
            store: Arc::new(SqliteFieldStore::open_in_memory().unwrap()),
            tools: Arc::new(tools),
        }
    }

    fn engine(&self) -> RegenerationEngine {
        let catalog: Arc<dyn CatalogProvider> = self.catalog.clone();
        let store: Arc<dyn FieldStore> = self.store.clone();
        RegenerationEngine::new(catalog, store, self.tools.clone())
    }

    async fn persist(&self, name: &str, expr: &str) -> CalculatedFieldDefinition {
        let draft = CalculatedFieldDefinition::draft(credit_scope(), FieldCandidate::new(name, expr), "analyst");
        let Admission::Validated { field, .. } =
            Validator::with_probe(Arc::new(ScriptedProbe::new(Driver::Snowflake)), RetryPolicy::default())
                .admit(draft, &credit_snapshot())
                .await
                .unwrap()
        else {
            panic!("fixture rejected");
        };
        match self.store.put_if_absent_or_same_version(field, None).unwrap() {
            fieldforge::store::PutOutcome::Persisted { definition, .. } => definition,
            other => panic!("expected Persisted, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_base_view_without_fields() {
    let harness = Harness::new();
    let engine = harness.engine();

    let view = engine.regenerate(&credit_scope()).await.unwrap();

    assert_eq!(view.generation_version, 0);
    let measures: Vec<_> = view.measures.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(measures, vec!["LTM_EBITDA", "TOTAL_LEVERAGE"]);
    assert_eq!(view.dimensions.len(), 3);
    assert_eq!(view.relation.as_deref(), Some(CREDIT_RELATION));
    assert!(Arc::ptr_eq(&view, &engine.current(&credit_scope()).unwrap()));
}

#[tokio::test]
async fn test_regeneration_folds_active_fields() {
    let harness = Harness::new();
    let engine = harness.engine();
    harness.persist("EBITDA_X_LEVERAGE", "LTM_EBITDA * TOTAL_LEVERAGE").await;
    harness.persist("BORROWER_UPPER", "UPPER(BORROWER)").await;

    let view = engine.regenerate(&credit_scope()).await.unwrap();

    assert_eq!(view.field_names(), vec!["BORROWER_UPPER", "EBITDA_X_LEVERAGE"]);
    let field = view.field("ebitda_x_leverage").unwrap();
    assert_eq!(field.expression, "LTM_EBITDA * TOTAL_LEVERAGE");
    assert_eq!(field.data_type, DataType::Number);
    assert_eq!(view.generation_version, 1);
    assert_eq!(view.store_read_version, 2);
}

#[tokio::test]
async fn test_deprecated_field_dropped_and_old_view_untouched() {
    let harness = Harness::new();
    let engine = harness.engine();
    harness.persist("DOUBLED", "LTM_EBITDA * 2").await;

    let before = engine.regenerate(&credit_scope()).await.unwrap();
    assert!(before.contains_field("DOUBLED"));

    harness.store.deprecate(&credit_scope(), "DOUBLED", 1).unwrap();
    let after = engine.regenerate(&credit_scope()).await.unwrap();

    assert!(!after.contains_field("DOUBLED"));
    assert!(before.contains_field("DOUBLED"));
    assert!(after.store_read_version > before.store_read_version);
}

#[tokio::test]
async fn test_collision_keeps_previous_view() {
    let harness = Harness::new();
    let engine = harness.engine();
    let published = engine.regenerate(&credit_scope()).await.unwrap();

    // Valid on its own, but shadows the base column of the same name.
    harness.persist("BORROWER", "UPPER(BORROWER)").await;
    let err = engine.regenerate(&credit_scope()).await.unwrap_err();

    assert!(matches!(
        err,
        RegenerationError::NameCollisionWithBaseColumn { ref fields } if fields == &vec!["BORROWER".to_string()]
    ));
    assert!(!err.is_transient());
    assert!(Arc::ptr_eq(&published, &engine.current(&credit_scope()).unwrap()));

    let failure = engine.last_failure(&credit_scope()).unwrap();
    assert_eq!(failure.code, "NameCollisionWithBaseColumn");
    assert!(failure.store_read_version.is_some());

    harness.store.deprecate(&credit_scope(), "BORROWER", 1).unwrap();
    engine.regenerate(&credit_scope()).await.unwrap();
    assert!(engine.last_failure(&credit_scope()).is_none());
}

#[tokio::test]
async fn test_catalog_drift_is_a_failure() {
    let harness = Harness::new();
    let engine = harness.engine();
    harness.persist("EBITDA_X_LEVERAGE", "LTM_EBITDA * TOTAL_LEVERAGE").await;

    let mut columns = credit_columns();
    columns.retain(|c| c.name != "TOTAL_LEVERAGE");
    harness
        .catalog
        .register(credit_scope(), SourceRelation::parse(CREDIT_RELATION), columns)
        .unwrap();

    let err = engine.regenerate(&credit_scope()).await.unwrap_err();
    assert!(matches!(
        err,
        RegenerationError::DanglingReference { ref field, ref column }
            if field == "EBITDA_X_LEVERAGE" && column == "TOTAL_LEVERAGE"
    ));
    assert!(engine.current(&credit_scope()).is_none());
}

#[tokio::test]
async fn test_merged_probe() {
    let harness = Harness::new();
    harness.persist("DOUBLED", "LTM_EBITDA * 2").await;
    harness.persist("HALVED", "LTM_EBITDA / 2").await;

    let probe = Arc::new(ScriptedProbe::new(Driver::Snowflake));
    let engine = harness.engine().with_probe(probe.clone(), RetryPolicy::default());
    engine.regenerate(&credit_scope()).await.unwrap();

    let submitted = probe.submitted();
    assert_eq!(submitted.len(), 1);
    assert!(submitted[0].contains("(LTM_EBITDA * 2) AS \"__PROBE_0\""));
    assert!(submitted[0].contains("(LTM_EBITDA / 2) AS \"__PROBE_1\""));
    assert!(submitted[0].ends_with("WHERE 1 = 0"));
}

#[tokio::test]
async fn test_merged_probe_rejection() {
    let harness = Harness::new();
    harness.persist("DOUBLED", "LTM_EBITDA * 2").await;

    let probe = Arc::new(ScriptedProbe::new(Driver::Snowflake).rejecting("__PROBE_0", "ambiguous column"));
    let engine = harness.engine().with_probe(probe, RetryPolicy::default());

    let err = engine.regenerate(&credit_scope()).await.unwrap_err();
    assert!(matches!(err, RegenerationError::EngineRejected { ref message } if message == "ambiguous column"));
    assert_eq!(engine.last_failure(&credit_scope()).unwrap().code, "EngineRejected");
}

#[tokio::test]
async fn test_unknown_scope() {
    let harness = Harness::new();
    let engine = harness.engine();
    let err = engine.regenerate(&ScopeId::new("sales")).await.unwrap_err();
    assert!(matches!(err, RegenerationError::Catalog(_)));
}

#[tokio::test]
async fn test_tool_export_refreshed_after_publish() {
    let harness = Harness::new();
    let engine = harness.engine();
    harness.persist("DOUBLED", "LTM_EBITDA * 2").await;

    assert!(harness.tools.export(&credit_scope()).calculated_fields.is_empty());
    engine.regenerate(&credit_scope()).await.unwrap();

    let set = harness.tools.export(&credit_scope());
    assert_eq!(set.generation_version, Some(1));
    assert_eq!(set.calculated_fields[0].name, "DOUBLED");
    let tool_names: Vec<_> = set.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tool_names, vec!["PD_FROM_RATING"]);
}

#[tokio::test]
async fn test_concurrent_regenerations_publish_whole_views() {
    let harness = Harness::new();
    let engine = Arc::new(harness.engine());
    for i in 0..5 {
        harness.persist(&format!("FIELD_{i}"), "LTM_EBITDA").await;
    }

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.regenerate(&credit_scope()).await.unwrap() })
        })
        .collect();
    for task in tasks {
        let view = task.await.unwrap();
        assert_eq!(view.calculated_fields.len(), 5);
    }
    assert_eq!(engine.current(&credit_scope()).unwrap().calculated_fields.len(), 5);
}
