//! AST for the resoql query language.
//!
//! The parser produces one immutable [`Query`] per query text. Every node is
//! a closed tagged union so consumers pattern-match exhaustively instead of
//! probing shapes at runtime.

use serde_json::Value;

use crate::error::{Error, Result};

/// Dotted relationship path, one segment per element (`a.b.c` -> `["a","b","c"]`).
pub type FieldPath = Vec<String>;

/// Join a field path back to its dotted form, for error messages.
pub fn path_to_string(path: &[String]) -> String {
    path.join(".")
}

/// A literal value appearing in query text or supplied as a bind parameter.
///
/// `Date` and `DateTime` carry their source text, validated against the
/// strict pattern grammars at construction time. Numbers are f64 and admit
/// `NaN` and `±Infinity`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Date(String),
    DateTime(String),
}

impl Literal {
    /// Build a date literal, rejecting payloads that fail the strict
    /// `YYYY-MM-DD` pattern.
    pub fn date(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if is_valid_date(&s) {
            Ok(Literal::Date(s))
        } else {
            Err(Error::syntax(format!("Invalid date literal: {}", s), 0))
        }
    }

    /// Build a datetime literal, rejecting payloads that fail the strict
    /// `YYYY-MM-DDThh:mm[:ss](Z|±hh:mm)` pattern.
    pub fn datetime(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if is_valid_datetime(&s) {
            Ok(Literal::DateTime(s))
        } else {
            Err(Error::syntax(format!("Invalid datetime literal: {}", s), 0))
        }
    }

    /// Convert to a JSON value. `NaN` and infinities have no JSON
    /// representation and become null.
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
            Literal::Date(s) | Literal::DateTime(s) => Value::String(s.clone()),
        }
    }

    /// Classify a scalar JSON value as a literal. Arrays and objects have
    /// no literal form.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Literal::Number),
            Value::String(s) => Some(Literal::String(s.clone())),
            _ => None,
        }
    }
}

fn all_digits(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_digit())
}

/// Strict `YYYY-MM-DD` check, including calendar validity.
pub fn is_valid_date(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return false;
    }
    if !(all_digits(&b[0..4]) && all_digits(&b[5..7]) && all_digits(&b[8..10])) {
        return false;
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Strict `YYYY-MM-DDThh:mm[:ss](Z|±hh:mm)` check.
pub fn is_valid_datetime(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 17 || !is_valid_date(&s[0..10]) || b[10] != b'T' {
        return false;
    }
    if !(all_digits(&b[11..13]) && b[13] == b':' && all_digits(&b[14..16])) {
        return false;
    }
    let hour: u32 = s[11..13].parse().unwrap_or(99);
    let minute: u32 = s[14..16].parse().unwrap_or(99);
    if hour > 23 || minute > 59 {
        return false;
    }
    let mut rest = &b[16..];
    // Optional seconds
    if rest.first() == Some(&b':') {
        if rest.len() < 3 || !all_digits(&rest[1..3]) {
            return false;
        }
        let sec: u32 = std::str::from_utf8(&rest[1..3])
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(99);
        if sec > 59 {
            return false;
        }
        rest = &rest[3..];
    }
    match rest {
        [b'Z'] => true,
        [sign, h1, h2, b':', m1, m2] if (*sign == b'+' || *sign == b'-') => {
            if !(h1.is_ascii_digit() && h2.is_ascii_digit() && m1.is_ascii_digit() && m2.is_ascii_digit()) {
                return false;
            }
            let oh = (h1 - b'0') as u32 * 10 + (h2 - b'0') as u32;
            let om = (m1 - b'0') as u32 * 10 + (m2 - b'0') as u32;
            oh < 24 && om < 60
        }
        _ => false,
    }
}

/// An expression usable as a function argument or comparison operand:
/// a literal, a dotted field path, or a nested function call.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Field(FieldPath),
    FunctionCall { name: String, args: Vec<Expression> },
}

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub spec: FieldSpec,
    pub alias: Option<String>,
}

/// Tagged select-list variants. Aggregate fields are function calls whose
/// function resolves to an aggregate kind at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Field(FieldPath),
    FunctionCall { name: String, args: Vec<Expression> },
    Subquery(Box<Query>),
}

/// One entry of the from list: a resolver or relationship path plus an
/// optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct FromEntry {
    pub path: FieldPath,
    pub alias: Option<String>,
}

/// Comparison operators of the condition grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    Includes,
    Excludes,
}

/// Right/left operand of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Expr(Expression),
    List(Vec<Literal>),
    Subquery(Box<Query>),
}

/// Boolean condition tree, built bottom-up by the precedence resolver.
/// `not` binds to the single following operand; `and` binds tighter than
/// `or`. Double negation is preserved, never simplified.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Comparison {
        op: ComparisonOp,
        left: Operand,
        right: Operand,
    },
    And(Box<ConditionNode>, Box<ConditionNode>),
    Or(Box<ConditionNode>, Box<ConditionNode>),
    Not(Box<ConditionNode>),
}

/// Sort direction for an order-by entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Null placement for an order-by entry, independent of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullsOrder {
    #[default]
    First,
    Last,
}

/// ORDER BY entry: key, direction (default asc), nulls (default first).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub target: Expression,
    pub direction: Direction,
    pub nulls: NullsOrder,
}

/// AST node for a complete query. Produced once per query text; immutable
/// afterward.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub from: Vec<FromEntry>,
    pub where_clause: Option<ConditionNode>,
    pub group_by: Vec<FieldPath>,
    pub having: Option<ConditionNode>,
    pub order_by: Vec<OrderSpec>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Locking hints from a trailing `for update|view|reference` clause.
    pub for_clause: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_validation() {
        assert!(is_valid_date("2024-03-15"));
        assert!(!is_valid_date("2024-3-15"));
        assert!(!is_valid_date("2024-13-01"));
        assert!(!is_valid_date("2024-02-30"));
        assert!(!is_valid_date("20240315"));
        assert!(!is_valid_date("2024-03-15T00:00Z"));
    }

    #[test]
    fn test_datetime_validation() {
        assert!(is_valid_datetime("2024-03-15T10:30Z"));
        assert!(is_valid_datetime("2024-03-15T10:30:45Z"));
        assert!(is_valid_datetime("2024-03-15T10:30:45+09:00"));
        assert!(is_valid_datetime("2024-03-15T10:30-05:30"));
        assert!(!is_valid_datetime("2024-03-15"));
        assert!(!is_valid_datetime("2024-03-15T10:30"));
        assert!(!is_valid_datetime("2024-03-15T24:00Z"));
        assert!(!is_valid_datetime("2024-03-15T10:61Z"));
        assert!(!is_valid_datetime("2024-03-15 10:30:45Z"));
    }

    #[test]
    fn test_literal_constructors() {
        assert!(Literal::date("2024-01-31").is_ok());
        assert!(Literal::date("2024-01-32").is_err());
        assert!(Literal::datetime("2024-01-31T00:00Z").is_ok());
        assert!(Literal::datetime("not a datetime").is_err());
    }

    #[test]
    fn test_literal_to_value() {
        assert_eq!(Literal::Number(1.5).to_value(), serde_json::json!(1.5));
        assert_eq!(Literal::Number(f64::NAN).to_value(), Value::Null);
        assert_eq!(Literal::Null.to_value(), Value::Null);
        assert_eq!(
            Literal::String("x".into()).to_value(),
            Value::String("x".into())
        );
    }

    #[test]
    fn test_path_to_string() {
        assert_eq!(
            path_to_string(&["a".to_string(), "b".to_string()]),
            "a.b"
        );
    }
}
