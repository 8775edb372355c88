use fieldforge::expr::guard::{self, FORBIDDEN_KEYWORDS};
use fieldforge::model::DataType;
use fieldforge::testing::fixtures::credit_snapshot;
use fieldforge::validation::{validate_static, ValidationCode};

fn assert_forbidden(text: &str) {
    let result = validate_static("FIELD", text, None, &credit_snapshot())
        .expect_err(&format!("'{text}' must be rejected"));
    assert!(!result.ok);
    assert!(
        result.has_code(ValidationCode::ForbiddenConstruct),
        "'{text}' reported {:?}",
        result.codes()
    );
}

#[test]
fn test_every_keyword_rejected_in_every_position() {
    for keyword in FORBIDDEN_KEYWORDS {
        let lower = keyword.to_ascii_lowercase();
        assert_forbidden(&format!("{keyword} LTM_EBITDA"));
        assert_forbidden(&format!("LTM_EBITDA + {lower}"));
        assert_forbidden(&format!("LTM_EBITDA * ({keyword})"));
        assert_forbidden(&format!("'{lower} me' || BORROWER"));
        assert_forbidden(&format!("UPPER('a ''{keyword}'' b')"));
        assert_forbidden(&format!("CASE WHEN IS_DEFAULTED THEN '{keyword}' ELSE BORROWER END"));
    }
}

#[test]
fn test_separators_and_comments_rejected() {
    for text in [
        "LTM_EBITDA;",
        "LTM_EBITDA -- trailing",
        "LTM_EBITDA /* hidden */",
        "'a;b' || BORROWER",
        "BORROWER || '*/'",
    ] {
        assert_forbidden(text);
    }
}

#[test]
fn test_injection_reports_both_tokens() {
    let result =
        validate_static("FIELD", "LTM_EBITDA; DROP TABLE DIM_CREDIT", None, &credit_snapshot())
            .unwrap_err();

    assert_eq!(result.codes(), vec![ValidationCode::ForbiddenConstruct]);
    let positions: Vec<_> = result.errors.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![Some(10), Some(12)]);
    assert!(result.is_terminal());
}

#[test]
fn test_identifiers_containing_keywords_allowed() {
    assert!(guard::scan("UPDATED_AT || CREATED_BY || DROPPED_FLAG").is_empty());
    let checked =
        validate_static("FIELD", "LTM_EBITDA * TOTAL_LEVERAGE", Some(DataType::Number), &credit_snapshot())
            .unwrap();
    assert_eq!(checked.inferred_type, DataType::Number);
}

#[test]
fn test_calls_outside_allow_list_rejected() {
    for text in [
        "SYSTEM_CANCEL_ALL_QUERIES()",
        "LTM_EBITDA + RANDOM()",
        "SUM(LTM_EBITDA)",
        "ROW_NUMBER() OVER (ORDER BY LTM_EBITDA)",
        "LTM_EBITDA IN (SELECT 1)",
    ] {
        assert_forbidden(text);
    }
}
