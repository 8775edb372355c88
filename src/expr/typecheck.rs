//! Type inference over the restricted expression AST.
//!
//! Types propagate bottom-up through a fixed compatibility table:
//!
//! | Operator            | Operands                         | Result    |
//! |---------------------|----------------------------------|-----------|
//! | `* / %`             | numeric, numeric                 | NUMBER    |
//! | `+ -`               | numeric, numeric                 | NUMBER    |
//! | `+ -`               | date/timestamp, numeric          | left type |
//! | `-`                 | date/timestamp, same             | NUMBER    |
//! | `\|\|`              | string, string                   | VARCHAR   |
//! | `= <> < > <= >=`    | compatible                       | BOOLEAN   |
//! | `AND OR NOT`        | boolean                          | BOOLEAN   |
//! | `LIKE`              | string, string                   | BOOLEAN   |
//!
//! `VARIANT` (and `NULL`) is compatible with everything. A node that fails
//! to type is given `VARIANT` so one mistake is reported once.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::functions::Func;
use crate::catalog::CatalogSnapshot;
use crate::model::DataType;

/// A type error found while inferring an expression's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIssue {
    pub message: String,
    /// A column or function name near the error, for locating it in the text.
    pub anchor: Option<String>,
}

/// Outcome of type inference.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCheck {
    pub inferred: DataType,
    pub issues: Vec<TypeIssue>,
}

impl TypeCheck {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Infer the result type of `expr` against a catalog.
///
/// Unresolved columns type as `VARIANT`; reference resolution reports them.
pub fn infer_type(expr: &Expr, catalog: &CatalogSnapshot) -> TypeCheck {
    let mut checker = TypeChecker {
        catalog,
        issues: Vec::new(),
    };
    let inferred = checker.infer(expr);
    TypeCheck {
        inferred,
        issues: checker.issues,
    }
}

/// Whether values of two types can be compared with each other.
pub fn compatible(a: DataType, b: DataType) -> bool {
    a == b
        || a == DataType::Variant
        || b == DataType::Variant
        || (a.is_numeric() && b.is_numeric())
        || (a.is_temporal() && b.is_temporal())
}

/// Common type of two branches, if there is one.
pub fn unify(a: DataType, b: DataType) -> Option<DataType> {
    match (a, b) {
        _ if a == b => Some(a),
        (DataType::Variant, other) | (other, DataType::Variant) => Some(other),
        _ if a.is_temporal() && b.is_temporal() => Some(DataType::Timestamp),
        _ => None,
    }
}

struct TypeChecker<'a> {
    catalog: &'a CatalogSnapshot,
    issues: Vec<TypeIssue>,
}

impl TypeChecker<'_> {
    fn issue(&mut self, message: String, anchor: Option<&Expr>) -> DataType {
        self.issues.push(TypeIssue {
            message,
            anchor: anchor.and_then(anchor_of),
        });
        DataType::Variant
    }

    fn require(&mut self, expr: &Expr, ty: DataType, ok: fn(DataType) -> bool, wanted: &str, context: &str) {
        if ty != DataType::Variant && !ok(ty) {
            self.issue(
                format!("{context} requires {wanted} operands, but {expr} is {ty}"),
                Some(expr),
            );
        }
    }

    fn infer(&mut self, expr: &Expr) -> DataType {
        match expr {
            Expr::Column { name, .. } => self
                .catalog
                .resolve(name)
                .map_or(DataType::Variant, |c| c.data_type),

            Expr::Literal(lit) => match lit {
                Literal::Null => DataType::Variant,
                Literal::Bool(_) => DataType::Boolean,
                Literal::Number(_) => DataType::Number,
                Literal::String(_) => DataType::Varchar,
            },

            Expr::BinaryOp { left, op, right } => {
                let lt = self.infer(left);
                let rt = self.infer(right);
                self.infer_binary(left, *op, right, lt, rt)
            }

            Expr::UnaryOp { op, expr: inner } => {
                let ty = self.infer(inner);
                match op {
                    UnaryOp::Not => {
                        self.require(inner, ty, is_boolean, "BOOLEAN", "NOT");
                        DataType::Boolean
                    }
                    UnaryOp::Neg | UnaryOp::Plus => {
                        self.require(inner, ty, is_numeric, "numeric", "unary sign");
                        DataType::Number
                    }
                    UnaryOp::IsNull | UnaryOp::IsNotNull => DataType::Boolean,
                }
            }

            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let operand_type = operand.as_ref().map(|o| self.infer(o));
                let mut result: Option<DataType> = None;

                for clause in when_clauses {
                    let cond = self.infer(&clause.condition);
                    match operand_type {
                        Some(ot) if !compatible(ot, cond) => {
                            self.issue(
                                format!("CASE operand of type {ot} cannot be compared with {} ({cond})", clause.condition),
                                Some(&clause.condition),
                            );
                        }
                        Some(_) => {}
                        None => self.require(&clause.condition, cond, is_boolean, "BOOLEAN", "WHEN"),
                    }
                    let branch = self.infer(&clause.result);
                    result = Some(self.unify_branch(result, branch, &clause.result));
                }
                if let Some(else_clause) = else_clause {
                    let branch = self.infer(else_clause);
                    result = Some(self.unify_branch(result, branch, else_clause));
                }
                result.unwrap_or(DataType::Variant)
            }

            Expr::Cast { expr: inner, target_type } => {
                self.infer(inner);
                *target_type
            }

            Expr::Between {
                expr: inner,
                low,
                high,
                ..
            } => {
                let ty = self.infer(inner);
                for bound in [low, high] {
                    let bt = self.infer(bound);
                    if !compatible(ty, bt) {
                        self.issue(
                            format!("BETWEEN bound {bound} ({bt}) is not comparable with {inner} ({ty})"),
                            Some(&**bound),
                        );
                    }
                }
                DataType::Boolean
            }

            Expr::InList {
                expr: inner, list, ..
            } => {
                let ty = self.infer(inner);
                for item in list {
                    let it = self.infer(item);
                    if !compatible(ty, it) {
                        self.issue(
                            format!("IN list item {item} ({it}) is not comparable with {inner} ({ty})"),
                            Some(item),
                        );
                    }
                }
                DataType::Boolean
            }

            Expr::Function { func, args } => {
                let types: Vec<DataType> = args.iter().map(|a| self.infer(a)).collect();
                self.infer_function(*func, args, &types)
            }
        }
    }

    fn unify_branch(&mut self, acc: Option<DataType>, branch: DataType, at: &Expr) -> DataType {
        let Some(acc) = acc else {
            return branch;
        };
        if acc.is_numeric() && branch.is_numeric() {
            return DataType::Number;
        }
        match unify(acc, branch) {
            Some(ty) => ty,
            None => self.issue(
                format!("branch {at} has type {branch}, but earlier branches are {acc}"),
                Some(at),
            ),
        }
    }

    fn infer_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr, lt: DataType, rt: DataType) -> DataType {
        use DataType::*;

        match op {
            BinaryOp::Add | BinaryOp::Sub => match (lt, rt) {
                _ if lt.is_numeric() && rt.is_numeric() => Number,
                (Variant, Variant) => Variant,
                (t, Number) | (t, Variant) if t.is_temporal() => t,
                (Number, t) | (Variant, t) if t.is_temporal() && op == BinaryOp::Add => t,
                (a, b) if a.is_temporal() && b.is_temporal() && op == BinaryOp::Sub => Number,
                (Variant, Number) | (Number, Variant) => Number,
                _ => self.issue(
                    format!("operator {op} cannot combine {left} ({lt}) and {right} ({rt})"),
                    Some(if lt.is_numeric() || lt.is_temporal() { right } else { left }),
                ),
            },

            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let before = self.issues.len();
                let context = format!("operator {op}");
                self.require(left, lt, is_numeric, "numeric", &context);
                self.require(right, rt, is_numeric, "numeric", &context);
                if self.issues.len() > before {
                    Variant
                } else {
                    Number
                }
            }

            BinaryOp::Concat => {
                let before = self.issues.len();
                self.require(left, lt, is_string, "string", "operator ||");
                self.require(right, rt, is_string, "string", "operator ||");
                if self.issues.len() > before {
                    Variant
                } else {
                    Varchar
                }
            }

            BinaryOp::Like | BinaryOp::NotLike => {
                self.require(left, lt, is_string, "string", "LIKE");
                self.require(right, rt, is_string, "string", "LIKE");
                Boolean
            }

            BinaryOp::And | BinaryOp::Or => {
                let context = format!("operator {op}");
                self.require(left, lt, is_boolean, "BOOLEAN", &context);
                self.require(right, rt, is_boolean, "BOOLEAN", &context);
                Boolean
            }

            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Lte | BinaryOp::Gte => {
                if !compatible(lt, rt) {
                    self.issue(
                        format!("cannot compare {left} ({lt}) with {right} ({rt})"),
                        Some(right),
                    );
                }
                Boolean
            }
        }
    }

    fn infer_function(&mut self, func: Func, args: &[Expr], types: &[DataType]) -> DataType {
        let context = format!("{}()", func.name());
        let expect_all = |checker: &mut Self, ok: fn(DataType) -> bool, wanted: &str| {
            for (arg, ty) in args.iter().zip(types) {
                checker.require(arg, *ty, ok, wanted, &context);
            }
        };

        match func {
            Func::Abs
            | Func::Round
            | Func::Ceil
            | Func::Floor
            | Func::Sqrt
            | Func::Ln
            | Func::Exp
            | Func::Power
            | Func::Div0 => {
                expect_all(self, is_numeric, "numeric");
                DataType::Number
            }

            Func::Upper | Func::Lower | Func::Trim => {
                expect_all(self, is_string, "string");
                DataType::Varchar
            }

            Func::Length => {
                expect_all(self, is_string, "string");
                DataType::Number
            }

            Func::Concat => DataType::Varchar,

            Func::Substr => {
                if let (Some(arg), Some(ty)) = (args.first(), types.first()) {
                    self.require(arg, *ty, is_string, "string", &context);
                }
                for (arg, ty) in args.iter().zip(types).skip(1) {
                    self.require(arg, *ty, is_numeric, "numeric", &context);
                }
                DataType::Varchar
            }

            Func::Year | Func::Month | Func::Day => {
                expect_all(self, is_temporal, "date");
                DataType::Number
            }

            Func::Greatest | Func::Least | Func::Coalesce => {
                self.unify_all(args, types)
            }

            Func::NullIf => {
                if let (Some(&a), Some(&b)) = (types.first(), types.get(1)) {
                    if !compatible(a, b) {
                        self.issue(
                            format!("NULLIF() arguments {} ({a}) and {} ({b}) are not comparable", args[0], args[1]),
                            args.get(1),
                        );
                    }
                    a
                } else {
                    DataType::Variant
                }
            }

            Func::Iff => {
                if let (Some(cond), Some(ty)) = (args.first(), types.first()) {
                    self.require(cond, *ty, is_boolean, "BOOLEAN", "IFF() condition");
                }
                self.unify_all(&args[1.min(args.len())..], &types[1.min(types.len())..])
            }
        }
    }

    fn unify_all(&mut self, args: &[Expr], types: &[DataType]) -> DataType {
        let mut acc: Option<DataType> = None;
        for (arg, ty) in args.iter().zip(types) {
            acc = Some(self.unify_branch(acc, *ty, arg));
        }
        acc.unwrap_or(DataType::Variant)
    }
}

fn anchor_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Column { name, .. } => Some(name.clone()),
        Expr::Function { func, .. } => Some(func.name().to_string()),
        other => other.children().into_iter().find_map(anchor_of),
    }
}

fn is_numeric(ty: DataType) -> bool {
    ty.is_numeric()
}

fn is_temporal(ty: DataType) -> bool {
    ty.is_temporal()
}

fn is_string(ty: DataType) -> bool {
    ty == DataType::Varchar
}

fn is_boolean(ty: DataType) -> bool {
    ty == DataType::Boolean
}
