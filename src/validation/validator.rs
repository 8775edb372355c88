//! The four-step expression validator.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::result::{ProbeStatus, ValidationCode, ValidationIssue, ValidationResult};
use crate::catalog::CatalogSnapshot;
use crate::expr::{self, guard, Expr, ParseError};
use crate::model::{
    CalculatedFieldDefinition, DataType, FieldStatus, LifecycleError, ValidatedField,
};
use crate::probe::{ProbeEngine, ProbeQuery, ProbeVerdict};
use crate::retry::{with_retry, RetryPolicy};

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]{0,127}$").expect("field name pattern is valid"));

/// Result of the static steps (grammar, references, types).
#[derive(Debug, Clone, PartialEq)]
pub struct StaticCheck {
    pub expr: Expr,
    pub inferred_type: DataType,
    pub referenced_columns: BTreeSet<String>,
}

/// Outcome of validating a draft.
#[derive(Debug)]
pub enum Admission {
    Validated {
        field: ValidatedField,
        result: ValidationResult,
    },
    /// The draft, now in `Rejected`, kept for audit.
    Rejected {
        draft: CalculatedFieldDefinition,
        result: ValidationResult,
    },
}

/// Validates calculated field drafts against a catalog snapshot.
///
/// Deterministic for a given snapshot and probe engine; never touches the
/// field store. Without an engine [`Validator::validate`] fails the
/// zero-row step with `EngineUnavailable`, so nothing is ever admitted
/// unchecked; [`Validator::check_static`] is the explicit static-only path.
#[derive(Clone)]
pub struct Validator {
    probe: Option<Arc<dyn ProbeEngine>>,
    retry: RetryPolicy,
}

impl Validator {
    /// A validator with no engine. It can report static problems but never
    /// admits a draft.
    pub fn without_engine() -> Self {
        Self {
            probe: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_probe(engine: Arc<dyn ProbeEngine>, retry: RetryPolicy) -> Self {
        Self {
            probe: Some(engine),
            retry,
        }
    }

    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Run all four steps.
    pub async fn validate(
        &self,
        draft: &CalculatedFieldDefinition,
        catalog: &CatalogSnapshot,
    ) -> ValidationResult {
        let declared = Some(draft.result_type).filter(|t| *t != DataType::Variant);
        let checked = match validate_static(&draft.name, &draft.expression_text, declared, catalog) {
            Ok(checked) => checked,
            Err(result) => {
                debug!(field = %draft.name, codes = ?result.codes(), "static validation failed");
                return result;
            }
        };

        let (probe, probe_attempts, issue) = self.run_probe(&draft.expression_text, catalog).await;
        let errors: Vec<ValidationIssue> = issue.into_iter().collect();

        ValidationResult {
            ok: errors.is_empty(),
            errors,
            inferred_type: Some(checked.inferred_type),
            referenced_columns: checked.referenced_columns,
            probe,
            probe_attempts,
        }
    }

    /// Run only the grammar, reference and type steps.
    ///
    /// The result reports `ProbeStatus::Skipped`; it is advisory and is never
    /// used for admission.
    pub fn check_static(
        &self,
        draft: &CalculatedFieldDefinition,
        catalog: &CatalogSnapshot,
    ) -> ValidationResult {
        let declared = Some(draft.result_type).filter(|t| *t != DataType::Variant);
        match validate_static(&draft.name, &draft.expression_text, declared, catalog) {
            Ok(checked) => ValidationResult {
                ok: true,
                errors: Vec::new(),
                inferred_type: Some(checked.inferred_type),
                referenced_columns: checked.referenced_columns,
                probe: ProbeStatus::Skipped,
                probe_attempts: 0,
            },
            Err(result) => result,
        }
    }

    /// Validate a draft and move it to `Validated` or `Rejected`.
    pub async fn admit(
        &self,
        mut draft: CalculatedFieldDefinition,
        catalog: &CatalogSnapshot,
    ) -> Result<Admission, LifecycleError> {
        if draft.status != FieldStatus::Draft {
            return Err(LifecycleError {
                name: draft.name,
                from: draft.status,
                to: FieldStatus::Validated,
            });
        }

        let result = self.validate(&draft, catalog).await;
        if result.ok {
            let inferred = result.inferred_type.unwrap_or(DataType::Variant);
            let field = ValidatedField::from_draft(draft, result.referenced_columns.clone(), inferred)?;
            Ok(Admission::Validated { field, result })
        } else {
            draft.reject()?;
            Ok(Admission::Rejected { draft, result })
        }
    }

    async fn run_probe(
        &self,
        text: &str,
        catalog: &CatalogSnapshot,
    ) -> (ProbeStatus, u32, Option<ValidationIssue>) {
        let Some(engine) = self.probe.as_deref() else {
            let issue = ValidationIssue::new(
                ValidationCode::EngineUnavailable,
                "no engine is configured to compile the expression against the schema",
                None,
            );
            return (ProbeStatus::Unavailable, 0, Some(issue));
        };
        let Some(relation) = &catalog.relation else {
            let issue = ValidationIssue::new(
                ValidationCode::EngineUnavailable,
                format!("scope '{}' has no source relation to probe against", catalog.scope_id),
                None,
            );
            return (ProbeStatus::Unavailable, 0, Some(issue));
        };

        let query = match ProbeQuery::zero_row(relation, engine.driver(), [text.trim()]) {
            Ok(query) => query,
            Err(e) => {
                let issue = ValidationIssue::new(ValidationCode::ForbiddenConstruct, e.to_string(), None);
                return (ProbeStatus::NotRun, 0, Some(issue));
            }
        };

        let query = &query;
        let outcome = with_retry(&self.retry, "probe", move || engine.probe(query)).await;
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(ProbeVerdict::Accepted) => (ProbeStatus::Accepted, attempts, None),
            Ok(ProbeVerdict::Rejected { message }) => {
                let issue = ValidationIssue::new(ValidationCode::EngineRejected, message, None);
                (ProbeStatus::Rejected, attempts, Some(issue))
            }
            Err(e) => {
                let issue = ValidationIssue::new(ValidationCode::EngineUnavailable, e.to_string(), None);
                (ProbeStatus::Unavailable, attempts, Some(issue))
            }
        }
    }
}

/// Run the grammar, reference and type steps.
///
/// Stops after the first step that reports anything; every issue of that
/// step is returned.
pub fn validate_static(
    name: &str,
    text: &str,
    declared: Option<DataType>,
    catalog: &CatalogSnapshot,
) -> Result<StaticCheck, ValidationResult> {
    let mut errors = Vec::new();

    // 1. Grammar
    let parsed = check_grammar(name, text, &mut errors);
    let expr = match parsed {
        Some(expr) if errors.is_empty() => expr,
        _ => return Err(ValidationResult::failed(errors)),
    };

    // 2. References
    let referenced_columns = resolve_references(&expr, text, catalog, &mut errors);
    if !errors.is_empty() {
        return Err(ValidationResult::failed(errors));
    }

    // 3. Types
    let inferred_type = check_types(&expr, text, declared, catalog, &mut errors);
    if !errors.is_empty() {
        let mut result = ValidationResult::failed(errors);
        result.referenced_columns = referenced_columns;
        return Err(result);
    }

    Ok(StaticCheck {
        expr,
        inferred_type,
        referenced_columns,
    })
}

fn check_grammar(name: &str, text: &str, errors: &mut Vec<ValidationIssue>) -> Option<Expr> {
    if !FIELD_NAME.is_match(name) {
        errors.push(ValidationIssue::new(
            ValidationCode::SyntaxError,
            format!("field name '{name}' must be a letter or underscore followed by letters, digits or underscores"),
            None,
        ));
    }

    let hits = guard::scan(text);
    if !hits.is_empty() {
        errors.extend(hits.into_iter().map(|hit| {
            ValidationIssue::new(
                ValidationCode::ForbiddenConstruct,
                format!("'{}' is not allowed in a calculated field", hit.construct),
                Some(hit.position),
            )
        }));
        return None;
    }

    match expr::parse_expression(text) {
        Ok(expr) => Some(expr),
        Err(parse_errors) => {
            errors.extend(parse_errors.into_iter().map(|e| {
                let code = match e {
                    ParseError::Forbidden { .. } => ValidationCode::ForbiddenConstruct,
                    ParseError::Syntax { .. } => ValidationCode::SyntaxError,
                };
                ValidationIssue::new(code, e.to_string(), e.position())
            }));
            None
        }
    }
}

fn resolve_references(
    expr: &Expr,
    text: &str,
    catalog: &CatalogSnapshot,
    errors: &mut Vec<ValidationIssue>,
) -> BTreeSet<String> {
    let mut referenced = BTreeSet::new();
    for name in expr.column_refs() {
        match catalog.resolve(name) {
            Some(column) => {
                referenced.insert(column.key());
            }
            None => errors.push(ValidationIssue::new(
                ValidationCode::UnknownColumn,
                format!("unknown column '{name}' in scope '{}'", catalog.scope_id),
                expr::locate_word(text, name),
            )),
        }
    }
    referenced
}

fn check_types(
    expr: &Expr,
    text: &str,
    declared: Option<DataType>,
    catalog: &CatalogSnapshot,
    errors: &mut Vec<ValidationIssue>,
) -> DataType {
    let check = expr::infer_type(expr, catalog);
    errors.extend(check.issues.into_iter().map(|issue| {
        let position = issue.anchor.as_deref().and_then(|a| expr::locate_word(text, a));
        ValidationIssue::new(ValidationCode::TypeMismatch, issue.message, position)
    }));

    if let Some(declared) = declared {
        if errors.is_empty() && check.inferred != DataType::Variant && check.inferred != declared {
            errors.push(ValidationIssue::new(
                ValidationCode::TypeMismatch,
                format!("declared type {declared} but the expression yields {}", check.inferred),
                None,
            ));
        }
    }

    check.inferred
}
