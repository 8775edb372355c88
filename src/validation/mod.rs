//! Validation of calculated field candidates.
//!
//! Steps run in order and stop at the first step that reports anything,
//! with every issue of that step collected:
//!
//! 1. **Grammar**: forbidden keywords/separators anywhere in the raw text,
//!    then the restricted grammar and function allow-list.
//! 2. **References**: every identifier resolves in the catalog snapshot.
//! 3. **Types**: inference through the compatibility table, plus the
//!    declared type if one was given.
//! 4. **Zero-row probe**: the expression compiled by the real engine in a
//!    query that cannot return or touch rows.
//!
//! Invalid input is an ordinary [`ValidationResult`], never an error.

mod result;
mod validator;

pub use result::{ProbeStatus, ValidationCode, ValidationIssue, ValidationResult};
pub use validator::{validate_static, Admission, StaticCheck, Validator};
