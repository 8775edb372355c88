//! Allow-listed scalar functions.
//!
//! Every function here is deterministic and side-effect-free. A call to any
//! name not listed is a forbidden construct, not a syntax error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed function enum, the exhaustive list of callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Func {
    // === Numeric ===
    Abs,
    /// ROUND(x [, scale])
    Round,
    /// CEIL(x), also CEILING
    Ceil,
    Floor,
    Sqrt,
    Ln,
    Exp,
    /// POWER(x, y), also POW
    Power,
    /// DIV0(x, y): x / y, or 0 when y is 0
    Div0,
    Greatest,
    Least,

    // === Null handling / conditional ===
    Coalesce,
    NullIf,
    /// IFF(condition, then, else)
    Iff,

    // === String ===
    Upper,
    Lower,
    Trim,
    /// LENGTH(s), also LEN
    Length,
    Concat,
    /// SUBSTR(s, start [, len]), also SUBSTRING
    Substr,

    // === Date parts ===
    Year,
    Month,
    Day,
}

impl Func {
    /// Every allow-listed function, in declaration order.
    pub const ALL: &'static [Func] = &[
        Self::Abs,
        Self::Round,
        Self::Ceil,
        Self::Floor,
        Self::Sqrt,
        Self::Ln,
        Self::Exp,
        Self::Power,
        Self::Div0,
        Self::Greatest,
        Self::Least,
        Self::Coalesce,
        Self::NullIf,
        Self::Iff,
        Self::Upper,
        Self::Lower,
        Self::Trim,
        Self::Length,
        Self::Concat,
        Self::Substr,
        Self::Year,
        Self::Month,
        Self::Day,
    ];

    /// Look up an allow-listed function by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name.trim().to_ascii_uppercase().as_str() {
            "ABS" => Self::Abs,
            "ROUND" => Self::Round,
            "CEIL" | "CEILING" => Self::Ceil,
            "FLOOR" => Self::Floor,
            "SQRT" => Self::Sqrt,
            "LN" => Self::Ln,
            "EXP" => Self::Exp,
            "POWER" | "POW" => Self::Power,
            "DIV0" => Self::Div0,
            "GREATEST" => Self::Greatest,
            "LEAST" => Self::Least,
            "COALESCE" | "IFNULL" | "NVL" => Self::Coalesce,
            "NULLIF" => Self::NullIf,
            "IFF" => Self::Iff,
            "UPPER" => Self::Upper,
            "LOWER" => Self::Lower,
            "TRIM" => Self::Trim,
            "LENGTH" | "LEN" => Self::Length,
            "CONCAT" => Self::Concat,
            "SUBSTR" | "SUBSTRING" => Self::Substr,
            "YEAR" => Self::Year,
            "MONTH" => Self::Month,
            "DAY" => Self::Day,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Abs => "ABS",
            Self::Round => "ROUND",
            Self::Ceil => "CEIL",
            Self::Floor => "FLOOR",
            Self::Sqrt => "SQRT",
            Self::Ln => "LN",
            Self::Exp => "EXP",
            Self::Power => "POWER",
            Self::Div0 => "DIV0",
            Self::Greatest => "GREATEST",
            Self::Least => "LEAST",
            Self::Coalesce => "COALESCE",
            Self::NullIf => "NULLIF",
            Self::Iff => "IFF",
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Trim => "TRIM",
            Self::Length => "LENGTH",
            Self::Concat => "CONCAT",
            Self::Substr => "SUBSTR",
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
        }
    }

    /// Accepted argument count as `(min, max)`; `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Self::Abs
            | Self::Ceil
            | Self::Floor
            | Self::Sqrt
            | Self::Ln
            | Self::Exp
            | Self::Upper
            | Self::Lower
            | Self::Trim
            | Self::Length
            | Self::Year
            | Self::Month
            | Self::Day => (1, Some(1)),
            Self::Round => (1, Some(2)),
            Self::Power | Self::Div0 | Self::NullIf => (2, Some(2)),
            Self::Substr => (2, Some(3)),
            Self::Iff => (3, Some(3)),
            Self::Greatest | Self::Least | Self::Coalesce | Self::Concat => (1, None),
        }
    }

    /// Check an argument count against [`Func::arity`].
    pub fn accepts(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.map_or(true, |m| count <= m)
    }

    pub fn describe_arity(&self) -> String {
        match self.arity() {
            (min, Some(max)) if min == max => format!("{min}"),
            (min, Some(max)) => format!("{min} to {max}"),
            (min, None) => format!("at least {min}"),
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
