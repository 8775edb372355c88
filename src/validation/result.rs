//! Validation results.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::DataType;

/// Category of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationCode {
    SyntaxError,
    ForbiddenConstruct,
    UnknownColumn,
    TypeMismatch,
    EngineRejected,
    /// The engine could not be reached; the probe produced no answer.
    EngineUnavailable,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::ForbiddenConstruct => "ForbiddenConstruct",
            Self::UnknownColumn => "UnknownColumn",
            Self::TypeMismatch => "TypeMismatch",
            Self::EngineRejected => "EngineRejected",
            Self::EngineUnavailable => "EngineUnavailable",
        }
    }

    /// Whether resubmitting the same expression could succeed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::EngineUnavailable)
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem with a candidate, in a form fit for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
    /// Byte offset into the expression text.
    pub position: Option<usize>,
}

impl ValidationIssue {
    pub fn new(code: ValidationCode, message: impl Into<String>, position: Option<usize>) -> Self {
        Self {
            code,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "[{}] at {}: {}", self.code, pos, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// What happened to the zero-row compile check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    /// An earlier step failed.
    NotRun,
    /// Static-only check; no engine was consulted.
    Skipped,
    Accepted,
    Rejected,
    Unavailable,
}

/// Outcome of one validation attempt.
///
/// Produced once and consumed immediately; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub inferred_type: Option<DataType>,
    /// Normalised names of the catalog columns the expression reads.
    pub referenced_columns: BTreeSet<String>,
    pub probe: ProbeStatus,
    pub probe_attempts: u32,
}

impl ValidationResult {
    pub(crate) fn failed(errors: Vec<ValidationIssue>) -> Self {
        Self {
            ok: false,
            errors,
            inferred_type: None,
            referenced_columns: BTreeSet::new(),
            probe: ProbeStatus::NotRun,
            probe_attempts: 0,
        }
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Error codes in report order, deduplicated.
    pub fn codes(&self) -> Vec<ValidationCode> {
        let mut codes: Vec<ValidationCode> = Vec::new();
        for issue in &self.errors {
            if !codes.contains(&issue.code) {
                codes.push(issue.code);
            }
        }
        codes
    }

    /// Whether every error is definitive.
    pub fn is_terminal(&self) -> bool {
        self.errors.iter().all(|e| e.code.is_terminal())
    }
}
