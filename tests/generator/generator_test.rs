use std::sync::Arc;

use fieldforge::generator::{CompletionError, GenerationError, GeneratorAdapter};
use fieldforge::model::DataType;
use fieldforge::retry::RetryPolicy;
use fieldforge::testing::fixtures::{credit_scope, credit_snapshot};
use fieldforge::testing::ScriptedCompletion;

const EBITDA_X_LEVERAGE: &str = r#"{"name": "EBITDA_X_LEVERAGE", "displayName": "EBITDA x Leverage", "expr": "LTM_EBITDA * TOTAL_LEVERAGE", "type": "NUMBER"}"#;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        multiplier: 2.0,
        timeout_ms: 200,
    }
}

#[tokio::test]
async fn test_scenario_candidate() {
    let completion = Arc::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));
    let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(3));

    let candidate = adapter
        .generate(&credit_scope(), "multiply LTM EBITDA by Total Leverage", &credit_snapshot())
        .await
        .unwrap();

    assert_eq!(candidate.name, "EBITDA_X_LEVERAGE");
    assert_eq!(candidate.display_name, "EBITDA x Leverage");
    assert_eq!(candidate.expression_text, "LTM_EBITDA * TOTAL_LEVERAGE");
    assert_eq!(candidate.result_type, Some(DataType::Number));
    assert_eq!(completion.calls(), 1);

    let metering = adapter.metering();
    assert_eq!((metering.calls, metering.attempts, metering.failures), (1, 1, 0));
}

#[tokio::test]
async fn test_request_bounds() {
    let completion = Arc::new(ScriptedCompletion::always(EBITDA_X_LEVERAGE));
    let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(3)).with_max_request_chars(10);

    for request in ["", "   ", "this request is far too long"] {
        let err = adapter
            .generate(&credit_scope(), request, &credit_snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)), "{request:?}");
    }
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_retried() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .then_fail(CompletionError::RateLimited("slow down".into()))
            .then_fail(CompletionError::Unavailable("503".into()))
            .then_reply(EBITDA_X_LEVERAGE),
    );
    let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(3));

    let candidate = adapter
        .generate(&credit_scope(), "multiply LTM EBITDA by Total Leverage", &credit_snapshot())
        .await
        .unwrap();

    assert_eq!(candidate.name, "EBITDA_X_LEVERAGE");
    assert_eq!(completion.calls(), 3);
    assert_eq!(adapter.metering().attempts, 3);
}

#[tokio::test]
async fn test_transient_exhaustion() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .then_fail(CompletionError::RateLimited("1".into()))
            .then_fail(CompletionError::RateLimited("2".into())),
    );
    let adapter = GeneratorAdapter::new(completion, fast_retry(2));

    let err = adapter
        .generate(&credit_scope(), "anything", &credit_snapshot())
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Transient { attempts: 2, .. }));
    assert!(err.is_transient());
    assert_eq!(adapter.metering().failures, 1);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let completion = Arc::new(
        ScriptedCompletion::always(EBITDA_X_LEVERAGE).with_delay(std::time::Duration::from_millis(500)),
    );
    let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(2));

    let err = adapter
        .generate(&credit_scope(), "anything", &credit_snapshot())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Transient {
            source: CompletionError::Timeout(_),
            ..
        }
    ));
    assert_eq!(completion.calls(), 2);
}

#[tokio::test]
async fn test_malformed_output_not_retried() {
    let replies = [
        "I think you want LTM_EBITDA * TOTAL_LEVERAGE",
        r#"{"name": "X", "expr": "LTM_EBITDA"}"#,
        r#"{"name": "X", "displayName": "X", "expr": "LTM_EBITDA", "type": "CURRENCY"}"#,
        r#"{"name": "X", "displayName": "X", "expr": "42", "type": "NUMBER"}"#,
        r#"[{"name": "X", "displayName": "X", "expr": "LTM_EBITDA", "type": "NUMBER"}]"#,
    ];

    for reply in replies {
        let completion = Arc::new(ScriptedCompletion::always(reply));
        let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(3));

        let err = adapter
            .generate(&credit_scope(), "anything", &credit_snapshot())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::MalformedOutput(_)), "{reply}: {err}");
        assert!(!err.is_transient());
        assert_eq!(completion.calls(), 1);
    }
}

#[tokio::test]
async fn test_refusal_is_upstream() {
    let completion = Arc::new(ScriptedCompletion::new().then_fail(CompletionError::Rejected("model not allowed".into())));
    let adapter = GeneratorAdapter::new(completion.clone(), fast_retry(3));

    let err = adapter
        .generate(&credit_scope(), "anything", &credit_snapshot())
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Upstream(_)));
    assert_eq!(completion.calls(), 1);
}
