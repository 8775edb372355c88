//! Restricted expression AST.
//!
//! Calculated field expressions are scalar, row-level and side-effect-free:
//! column references, literals, operators, CASE, CAST and calls to the
//! functions in [`Func`]. Anything else never makes it into this tree.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::functions::Func;
use crate::model::{normalize_name, DataType};

// =============================================================================
// Core Expression Type
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference, as written.
    Column { name: String, quoted: bool },

    Literal(Literal),

    /// Call to an allow-listed function.
    Function { func: Func, args: Vec<Expr> },

    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    UnaryOp { op: UnaryOp, expr: Box<Expr> },

    /// CASE expression. `operand` is set for the simple form
    /// (`CASE x WHEN 1 THEN ...`).
    Case {
        operand: Option<Box<Expr>>,
        when_clauses: Vec<WhenClause>,
        else_clause: Option<Box<Expr>>,
    },

    Cast { expr: Box<Expr>, target_type: DataType },

    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            name: name.into(),
            quoted: false,
        }
    }

    pub fn number(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Number(value.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn func(func: Func, args: Vec<Expr>) -> Self {
        Expr::Function { func, args }
    }

    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. } | Expr::Literal(_) => vec![],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::BinaryOp { left, right, .. } => vec![left, right],
            Expr::UnaryOp { expr, .. } | Expr::Cast { expr, .. } => vec![expr],
            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let mut out: Vec<&Expr> = operand.iter().map(|e| e.as_ref()).collect();
                for clause in when_clauses {
                    out.push(&clause.condition);
                    out.push(&clause.result);
                }
                out.extend(else_clause.iter().map(|e| e.as_ref()));
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
            Expr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
        }
    }

    /// Column references in order of first appearance, as written.
    pub fn column_refs(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.collect_columns(&mut seen, &mut out);
        out
    }

    fn collect_columns<'a>(&'a self, seen: &mut BTreeSet<String>, out: &mut Vec<&'a str>) {
        if let Expr::Column { name, .. } = self {
            if seen.insert(normalize_name(name)) {
                out.push(name);
            }
            return;
        }
        for child in self.children() {
            child.collect_columns(seen, out);
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { name, quoted: true } => write!(f, "\"{}\"", name.replace('"', "\"\"")),
            Expr::Column { name, .. } => f.write_str(name),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::BinaryOp { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::UnaryOp { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {}", expr),
                UnaryOp::Neg => write!(f, "-{}", expr),
                UnaryOp::Plus => write!(f, "+{}", expr),
                UnaryOp::IsNull => write!(f, "{} IS NULL", expr),
                UnaryOp::IsNotNull => write!(f, "{} IS NOT NULL", expr),
            },
            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                f.write_str("CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {}", operand)?;
                }
                for clause in when_clauses {
                    write!(f, " WHEN {} THEN {}", clause.condition, clause.result)?;
                }
                if let Some(else_clause) = else_clause {
                    write!(f, " ELSE {}", else_clause)?;
                }
                f.write_str(" END")
            }
            Expr::Cast { expr, target_type } => write!(f, "CAST({} AS {})", expr, target_type),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}BETWEEN {} AND {}", expr, not, low, high)
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}IN (", expr, not)?;
                write_list(f, list)?;
                f.write_str(")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

// =============================================================================
// Literal Values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Numeric literal kept in its source form.
    Number(String),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(true) => f.write_str("TRUE"),
            Literal::Bool(false) => f.write_str("FALSE"),
            Literal::Number(n) => f.write_str(n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,

    // Logical
    And,
    Or,

    // String
    Concat,
    Like,
    NotLike,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Gt | Self::Lte | Self::Gte
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Concat => "||",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    IsNull,
    IsNotNull,
}

// =============================================================================
// CASE Expression
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub condition: Expr,
    pub result: Expr,
}

impl WhenClause {
    pub fn new(condition: Expr, result: Expr) -> Self {
        Self { condition, result }
    }
}
