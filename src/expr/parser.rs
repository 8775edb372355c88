//! Expression parser that converts the sqlparser AST into our [`Expr`] AST.
//!
//! sqlparser accepts far more than a calculated field may contain, so the
//! conversion is where the grammar is restricted: anything without a
//! counterpart in [`Expr`] is reported, and conversion carries on so that
//! every problem in the expression is reported at once.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast as sql;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use thiserror::Error;

use super::ast::{BinaryOp, Expr, Literal, UnaryOp, WhenClause};
use super::functions::Func;
use crate::model::DataType;

static LOCATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Line: (\d+), Column: (\d+)").expect("location pattern is valid"));

/// Errors raised while parsing an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("syntax error: {message}")]
    Syntax {
        message: String,
        position: Option<usize>,
    },

    #[error("forbidden construct: {construct}")]
    Forbidden {
        construct: String,
        position: Option<usize>,
    },
}

impl ParseError {
    /// Byte offset into the expression text, when known.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Syntax { position, .. } | Self::Forbidden { position, .. } => *position,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

pub type ParseResult<T> = Result<T, Vec<ParseError>>;

/// Parse an expression under the restricted grammar.
pub fn parse_expression(text: &str) -> ParseResult<Expr> {
    if text.trim().is_empty() {
        return Err(vec![ParseError::Syntax {
            message: "expression is empty".to_string(),
            position: Some(0),
        }]);
    }

    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| vec![syntax_error(text, &e)])?;
    let parsed = parser
        .parse_expr()
        .map_err(|e| vec![syntax_error(text, &e)])?;

    let next = parser.peek_token();
    if next.token != Token::EOF {
        let found = next.token.to_string();
        return Err(vec![ParseError::Syntax {
            position: locate_word(text, &found),
            message: format!("unexpected '{found}' after end of expression"),
        }]);
    }

    let mut converter = Converter {
        text,
        errors: Vec::new(),
    };
    match converter.convert(&parsed) {
        Some(expr) if converter.errors.is_empty() => Ok(expr),
        _ => Err(converter.errors),
    }
}

fn syntax_error(text: &str, err: &ParserError) -> ParseError {
    let message = match err {
        ParserError::TokenizerError(m) | ParserError::ParserError(m) => m.clone(),
        other => other.to_string(),
    };

    let position = LOCATION_PATTERN.captures(&message).and_then(|caps| {
        let line: usize = caps.get(1)?.as_str().parse().ok()?;
        let column: usize = caps.get(2)?.as_str().parse().ok()?;
        line_column_to_offset(text, line, column)
    });

    ParseError::Syntax { message, position }
}

/// Convert a 1-based line/column (in characters) to a byte offset.
fn line_column_to_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    let mut offset = 0;
    for (i, content) in text.split('\n').enumerate() {
        if i + 1 == line {
            let within = content
                .char_indices()
                .nth(column.saturating_sub(1))
                .map_or(content.len(), |(b, _)| b);
            return Some(offset + within);
        }
        offset += content.len() + 1;
    }
    None
}

/// Byte offset of the first whole-word, case-insensitive occurrence of
/// `word` outside single-quoted literals.
pub fn locate_word(text: &str, word: &str) -> Option<usize> {
    if word.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let mut in_string = false;
    let mut prev: Option<char> = None;

    for (i, c) in text.char_indices() {
        if c == '\'' {
            in_string = !in_string;
        } else if !in_string && !prev.is_some_and(is_word) {
            if let Some(candidate) = text.get(i..i + word.len()) {
                let next = text[i + word.len()..].chars().next();
                let bounded = !word.ends_with(is_word) || !next.is_some_and(is_word);
                if candidate.eq_ignore_ascii_case(word) && bounded {
                    return Some(i);
                }
            }
        }
        prev = Some(c);
    }
    None
}

struct Converter<'a> {
    text: &'a str,
    errors: Vec<ParseError>,
}

impl Converter<'_> {
    fn unsupported(&mut self, what: impl Into<String>, anchor: Option<&str>) -> Option<Expr> {
        let what = what.into();
        self.errors.push(ParseError::Syntax {
            position: anchor.and_then(|a| locate_word(self.text, a)),
            message: format!("{what} is not supported in a calculated field"),
        });
        None
    }

    fn forbidden(&mut self, construct: impl Into<String>, anchor: &str) -> Option<Expr> {
        self.errors.push(ParseError::Forbidden {
            construct: construct.into(),
            position: locate_word(self.text, anchor),
        });
        None
    }

    fn boxed(&mut self, expr: &sql::Expr) -> Option<Box<Expr>> {
        self.convert(expr).map(Box::new)
    }

    /// Convert every item, keeping errors from all of them.
    fn convert_all<'e>(&mut self, exprs: impl IntoIterator<Item = &'e sql::Expr>) -> Option<Vec<Expr>> {
        let converted: Vec<Option<Expr>> = exprs.into_iter().map(|e| self.convert(e)).collect();
        converted.into_iter().collect()
    }

    fn convert(&mut self, expr: &sql::Expr) -> Option<Expr> {
        match expr {
            sql::Expr::Identifier(ident) => Some(Expr::Column {
                name: ident.value.clone(),
                quoted: ident.quote_style.is_some(),
            }),

            sql::Expr::CompoundIdentifier(parts) => {
                let anchor = parts.first().map(|p| p.value.clone());
                self.unsupported(
                    format!("qualified column reference '{}'", expr),
                    anchor.as_deref(),
                )
            }

            sql::Expr::Value(value) => self.convert_value(value),

            sql::Expr::Nested(inner) => self.convert(inner),

            sql::Expr::BinaryOp { left, op, right } => {
                let op = self.convert_binary_op(op);
                let left = self.boxed(left);
                let right = self.boxed(right);
                Some(Expr::BinaryOp {
                    left: left?,
                    op: op?,
                    right: right?,
                })
            }

            sql::Expr::UnaryOp { op, expr: inner } => {
                let op = match op {
                    sql::UnaryOperator::Not => Some(UnaryOp::Not),
                    sql::UnaryOperator::Minus => Some(UnaryOp::Neg),
                    sql::UnaryOperator::Plus => Some(UnaryOp::Plus),
                    other => {
                        self.unsupported(format!("operator '{other}'"), None);
                        None
                    }
                };
                let inner = self.boxed(inner);
                Some(Expr::UnaryOp {
                    op: op?,
                    expr: inner?,
                })
            }

            sql::Expr::IsNull(inner) => Some(Expr::unary(UnaryOp::IsNull, self.convert(inner)?)),
            sql::Expr::IsNotNull(inner) => {
                Some(Expr::unary(UnaryOp::IsNotNull, self.convert(inner)?))
            }

            sql::Expr::Like {
                negated,
                expr: inner,
                pattern,
                ..
            } => {
                let left = self.boxed(inner);
                let right = self.boxed(pattern);
                Some(Expr::BinaryOp {
                    left: left?,
                    op: if *negated { BinaryOp::NotLike } else { BinaryOp::Like },
                    right: right?,
                })
            }

            sql::Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let inner = self.boxed(inner);
                let low = self.boxed(low);
                let high = self.boxed(high);
                Some(Expr::Between {
                    expr: inner?,
                    low: low?,
                    high: high?,
                    negated: *negated,
                })
            }

            sql::Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let inner = self.boxed(inner);
                let list = self.convert_all(list);
                Some(Expr::InList {
                    expr: inner?,
                    list: list?,
                    negated: *negated,
                })
            }

            sql::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let operand = operand.as_ref().map(|o| self.boxed(o));
                let conditions = self.convert_all(conditions);
                let results = self.convert_all(results);
                let else_clause = else_result.as_ref().map(|e| self.boxed(e));

                let (conditions, results) = (conditions?, results?);
                if matches!(operand, Some(None)) || matches!(else_clause, Some(None)) {
                    return None;
                }

                let when_clauses = conditions
                    .into_iter()
                    .zip(results)
                    .map(|(condition, result)| WhenClause::new(condition, result))
                    .collect();
                Some(Expr::Case {
                    operand: operand.flatten(),
                    when_clauses,
                    else_clause: else_clause.flatten(),
                })
            }

            sql::Expr::Cast {
                expr: inner,
                data_type,
                ..
            } => {
                let target = data_type.to_string();
                let target_type = match DataType::from_str(&target) {
                    Some(t) => Some(t),
                    None => {
                        self.unsupported(format!("cast to '{target}'"), Some("CAST"));
                        None
                    }
                };
                let inner = self.boxed(inner);
                Some(Expr::Cast {
                    expr: inner?,
                    target_type: target_type?,
                })
            }

            sql::Expr::Function(function) => self.convert_function(function),

            // sqlparser gives these functions dedicated nodes.
            sql::Expr::Ceil { expr: inner, .. } => {
                Some(Expr::func(Func::Ceil, vec![self.convert(inner)?]))
            }
            sql::Expr::Floor { expr: inner, .. } => {
                Some(Expr::func(Func::Floor, vec![self.convert(inner)?]))
            }
            sql::Expr::Trim {
                expr: inner,
                trim_where: None,
                trim_what: None,
                ..
            } => Some(Expr::func(Func::Trim, vec![self.convert(inner)?])),
            sql::Expr::Substring {
                expr: inner,
                substring_from,
                substring_for,
                ..
            } => {
                let mut parts = vec![inner.as_ref()];
                parts.extend(substring_from.as_deref());
                parts.extend(substring_for.as_deref());
                let args = self.convert_all(parts)?;
                self.checked_call(Func::Substr, args)
            }

            sql::Expr::Subquery(_) | sql::Expr::InSubquery { .. } => {
                self.forbidden("subquery", "SELECT")
            }
            sql::Expr::Exists { .. } => self.forbidden("EXISTS subquery", "EXISTS"),

            other => self.unsupported(format!("'{other}'"), None),
        }
    }

    fn convert_value(&mut self, value: &sql::Value) -> Option<Expr> {
        match value {
            sql::Value::Number(n, _) => Some(Expr::number(n.to_string())),
            sql::Value::SingleQuotedString(s) => Some(Expr::string(s.clone())),
            sql::Value::Boolean(b) => Some(Expr::Literal(Literal::Bool(*b))),
            sql::Value::Null => Some(Expr::Literal(Literal::Null)),
            sql::Value::Placeholder(p) => self.forbidden(format!("placeholder {p}"), p),
            other => self.unsupported(format!("literal {other}"), None),
        }
    }

    fn convert_binary_op(&mut self, op: &sql::BinaryOperator) -> Option<BinaryOp> {
        use sql::BinaryOperator as B;
        let converted = match op {
            B::Plus => BinaryOp::Add,
            B::Minus => BinaryOp::Sub,
            B::Multiply => BinaryOp::Mul,
            B::Divide => BinaryOp::Div,
            B::Modulo => BinaryOp::Mod,
            B::Eq => BinaryOp::Eq,
            B::NotEq => BinaryOp::Ne,
            B::Lt => BinaryOp::Lt,
            B::Gt => BinaryOp::Gt,
            B::LtEq => BinaryOp::Lte,
            B::GtEq => BinaryOp::Gte,
            B::And => BinaryOp::And,
            B::Or => BinaryOp::Or,
            B::StringConcat => BinaryOp::Concat,
            other => {
                self.unsupported(format!("operator '{other}'"), None);
                return None;
            }
        };
        Some(converted)
    }

    fn convert_function(&mut self, function: &sql::Function) -> Option<Expr> {
        let name = function.name.to_string();
        let anchor = function
            .name
            .0
            .first()
            .map(|ident| ident.value.clone())
            .unwrap_or_else(|| name.clone());

        let Some(func) = Func::from_name(&name) else {
            return self.forbidden(format!("function {name}"), &anchor);
        };
        if function.over.is_some() {
            return self.forbidden(format!("window function {name}"), &anchor);
        }
        if function.filter.is_some() {
            return self.unsupported(format!("FILTER clause on {name}"), Some(&anchor));
        }

        let args = match &function.args {
            sql::FunctionArguments::None => Vec::new(),
            sql::FunctionArguments::Subquery(_) => {
                return self.forbidden("subquery", "SELECT");
            }
            sql::FunctionArguments::List(list) => {
                if list.duplicate_treatment.is_some() || !list.clauses.is_empty() {
                    return self.unsupported(format!("argument modifiers on {name}"), Some(&anchor));
                }
                let mut exprs = Vec::with_capacity(list.args.len());
                for arg in &list.args {
                    match arg {
                        sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(e)) => exprs.push(e),
                        _ => {
                            return self
                                .unsupported(format!("argument '{arg}' to {name}"), Some(&anchor));
                        }
                    }
                }
                self.convert_all(exprs)?
            }
        };

        self.checked_call(func, args)
    }

    fn checked_call(&mut self, func: Func, args: Vec<Expr>) -> Option<Expr> {
        if !func.accepts(args.len()) {
            self.errors.push(ParseError::Syntax {
                position: locate_word(self.text, func.name()),
                message: format!(
                    "{} expects {} argument(s), got {}",
                    func.name(),
                    func.describe_arity(),
                    args.len()
                ),
            });
            return None;
        }
        Some(Expr::func(func, args))
    }
}
