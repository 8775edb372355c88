//! Restricted expression language for calculated fields.
//!
//! ```text
//! expression text
//!      │
//!      ▼
//! guard::scan ──── forbidden keywords / separators (raw text, literals too)
//!      │
//!      ▼
//! parse_expression ── sqlparser → restricted Expr (allow-listed functions)
//!      │
//!      ▼
//! infer_type ──── compatibility table against a CatalogSnapshot
//! ```

mod ast;
mod functions;
pub mod guard;
mod parser;
mod typecheck;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp, WhenClause};
pub use functions::Func;
pub use guard::ForbiddenHit;
pub use parser::{locate_word, parse_expression, ParseError, ParseResult};
pub use typecheck::{compatible, infer_type, unify, TypeCheck, TypeIssue};
