#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use fieldforge::catalog::{CatalogError, CatalogProvider, SourceRelation, WorkerCatalogProvider};
use fieldforge::config::Driver;
use fieldforge::generator::{CompletionClient, WorkerCompletionClient};
use fieldforge::model::{DataType, ScopeId};
use fieldforge::probe::{ProbeEngine, ProbeError, ProbeQuery, ProbeVerdict, WorkerProbeEngine};
use fieldforge::worker::{EngineConnection, WorkerClient, WorkerError};

/// A worker that answers by pattern-matching request lines.
const FAKE_WORKER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -e 's/^{"id":"\([^"]*\)".*/\1/')
  case "$line" in
    *'"method":"catalog.columns"'*)
      printf '{"id":"%s","success":true,"result":{"columns":[{"name":"TOTAL_LEVERAGE","position":2,"data_type":"NUMBER(38,2)"},{"name":"LTM_EBITDA","position":1,"data_type":"NUMBER","comment":"LTM EBITDA"},{"name":"PAYLOAD","position":3,"data_type":"GEOGRAPHY"}]}}\n' "$id" ;;
    *NO_SUCH_COLUMN*)
      printf '{"id":"%s","success":false,"error":{"code":"QUERY_REJECTED","message":"invalid identifier NO_SUCH_COLUMN"}}\n' "$id" ;;
    *THROTTLED*)
      printf '{"id":"%s","success":false,"error":{"code":"RATE_LIMITED","message":"slow down"}}\n' "$id" ;;
    *SLOW_COLUMN*)
      ;;
    *WRITES_ROWS*)
      printf '{"id":"%s","success":true,"result":{"rows_affected":2}}\n' "$id" ;;
    *COMPLETE*)
      printf '{"id":"%s","success":true,"result":{"columns":["C"],"rows":[["generated text"]],"row_count":1}}\n' "$id" ;;
    *)
      printf '{"id":"%s","success":true,"result":{"columns":[],"rows":[],"row_count":0}}\n' "$id" ;;
  esac
done
"#;

async fn fake_worker(timeout: Duration) -> Arc<WorkerClient> {
    let args = vec!["-c".to_string(), FAKE_WORKER.to_string()];
    Arc::new(WorkerClient::spawn("sh", &args, timeout).await.unwrap())
}

fn connection() -> EngineConnection {
    EngineConnection::new(Driver::DuckDb, "./credit.duckdb")
}

fn probe(expr: &str) -> ProbeQuery {
    let relation = SourceRelation::parse("CREDIT.DIM_CREDIT").unwrap();
    ProbeQuery::zero_row(&relation, Driver::DuckDb, [expr]).unwrap()
}

#[tokio::test]
async fn test_catalog_introspection() {
    let client = fake_worker(Duration::from_secs(5)).await;
    let scope = ScopeId::new("credit");
    let provider = WorkerCatalogProvider::new(client, connection())
        .with_scope(scope.clone(), SourceRelation::parse("CREDIT.DIM_CREDIT").unwrap());

    let snapshot = provider.snapshot(&scope).await.unwrap();

    let names: Vec<&str> = snapshot.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["LTM_EBITDA", "TOTAL_LEVERAGE", "PAYLOAD"]);
    assert_eq!(snapshot.columns[0].display_name, "LTM EBITDA");
    assert_eq!(snapshot.columns[1].data_type, DataType::Number);
    assert_eq!(snapshot.columns[2].data_type, DataType::Variant);
    assert!(snapshot.relation.is_some());

    // Same schema, same version.
    assert_eq!(provider.snapshot(&scope).await.unwrap().version, snapshot.version);

    let err = provider.snapshot(&ScopeId::new("retail")).await.unwrap_err();
    assert!(matches!(err, CatalogError::UnknownScope(_)));
}

#[tokio::test]
async fn test_probe_verdicts() {
    let engine = WorkerProbeEngine::new(fake_worker(Duration::from_secs(5)).await, connection());

    assert_eq!(engine.probe(&probe("LTM_EBITDA * 2")).await.unwrap(), ProbeVerdict::Accepted);

    let verdict = engine.probe(&probe("NO_SUCH_COLUMN + 1")).await.unwrap();
    assert!(matches!(verdict, ProbeVerdict::Rejected { message } if message.contains("NO_SUCH_COLUMN")));

    let err = engine.probe(&probe("WRITES_ROWS")).await.unwrap_err();
    assert!(matches!(err, ProbeError::RowsTouched(2)));

    // A probe built for another dialect never reaches the worker.
    let relation = SourceRelation::parse("CREDIT.DIM_CREDIT").unwrap();
    let foreign = ProbeQuery::zero_row(&relation, Driver::MsSql, ["1"]).unwrap();
    assert!(matches!(engine.probe(&foreign).await, Err(ProbeError::Unsafe(_))));
}

#[tokio::test]
async fn test_completion_through_worker() {
    let client = fake_worker(Duration::from_secs(5)).await;
    let completion = WorkerCompletionClient::new(client, connection(), "COMPLETE", "model-x");

    assert_eq!(completion.complete("say something").await.unwrap(), "generated text");
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let engine = Arc::new(WorkerProbeEngine::new(fake_worker(Duration::from_secs(5)).await, connection()));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let expr = if i % 2 == 0 { "LTM_EBITDA" } else { "NO_SUCH_COLUMN" };
                (i, engine.probe(&probe(expr)).await.unwrap())
            })
        })
        .collect();

    for task in tasks {
        let (i, verdict) = task.await.unwrap();
        assert_eq!(verdict.is_accepted(), i % 2 == 0);
    }
}

#[tokio::test]
async fn test_timeout_leaves_client_usable() {
    let client = fake_worker(Duration::from_millis(200)).await;
    let conn = connection();

    let err = client
        .execute_read_only(&conn, "SELECT SLOW_COLUMN FROM T WHERE 1 = 0", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Timeout(200)));
    assert!(err.is_retriable());

    let rows = client.execute_read_only(&conn, "SELECT 1 WHERE 1 = 0", &[]).await.unwrap();
    assert_eq!(rows.touched(), 0);
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_remote_error_codes() {
    let client = fake_worker(Duration::from_secs(5)).await;
    let err = client
        .execute_read_only(&connection(), "SELECT THROTTLED", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::RateLimited(_)));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_exited_worker_is_retriable() {
    let args = vec!["-c".to_string(), "exit 0".to_string()];
    let client = WorkerClient::spawn("sh", &args, Duration::from_secs(2)).await.unwrap();

    let err = client
        .execute_read_only(&connection(), "SELECT 1 WHERE 1 = 0", &[])
        .await
        .unwrap_err();
    assert!(err.is_retriable(), "unexpected error {err:?}");
}

#[tokio::test]
async fn test_missing_binary() {
    let err = WorkerClient::spawn("/nonexistent/fieldforge-worker", &[], Duration::from_secs(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WorkerError::Spawn(_)));
}
