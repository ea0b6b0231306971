//! Value access and comparison helpers shared by the filter evaluator,
//! sorting and aggregation.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value;

use crate::ast::{is_valid_datetime, Direction, NullsOrder};
use crate::error::{Error, Result};

const MAX_LIKE_PATTERN: usize = 1000;

/// Field lookup on a record object: exact key first, then case-insensitive.
/// The engine never normalizes record keys, resolvers own their casing.
pub(crate) fn get_field<'v>(record: &'v Value, name: &str) -> Option<&'v Value> {
    let obj = record.as_object()?;
    obj.get(name).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Walk a dotted path through nested objects. A missing segment or a
/// non-object midway yields `None`.
pub(crate) fn pluck<'v>(record: &'v Value, path: &[String]) -> Option<&'v Value> {
    let mut current = record;
    for segment in path {
        current = get_field(current, segment)?;
    }
    Some(current)
}

fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        // Seconds are optional in query text but required by RFC 3339.
        if s.len() >= 16 && s.as_bytes().get(16) != Some(&b':') {
            let mut padded = String::with_capacity(s.len() + 3);
            padded.push_str(&s[..16]);
            padded.push_str(":00");
            padded.push_str(&s[16..]);
            DateTime::parse_from_rfc3339(&padded).ok()
        } else {
            None
        }
    })
}

/// Ordering between two non-null values: numeric for numbers, chronological
/// for datetime strings, lexicographic for other strings. Mixed or
/// unordered types yield `None`.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64())
        }
        (Value::String(x), Value::String(y)) => {
            if is_valid_datetime(x) && is_valid_datetime(y) {
                if let (Some(dx), Some(dy)) = (parse_datetime(x), parse_datetime(y)) {
                    return Some(dx.cmp(&dy));
                }
            }
            Some(x.cmp(y))
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Strict equality: null equals only null and is distinct from `""`;
/// numbers compare numerically; no string/number coercion anywhere.
pub(crate) fn equal_values(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two possibly-null sort keys. Null placement is decided before the
/// direction applies, so `nulls first/last` is independent of `asc/desc`.
pub(crate) fn compare_for_sort(
    a: &Value,
    b: &Value,
    direction: Direction,
    nulls: NullsOrder,
) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (false, true) => match nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (false, false) => {
            let base = compare_values(a, b).unwrap_or(Ordering::Equal);
            match direction {
                Direction::Asc => base,
                Direction::Desc => base.reverse(),
            }
        }
    }
}

/// Translate a LIKE pattern into an anchored regex. `%` matches any run,
/// `_` exactly one character, `\%` and `\_` are literal. Case-sensitive.
pub(crate) fn like_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_LIKE_PATTERN {
        return Err(Error::Execution(format!(
            "LIKE pattern too long ({} chars)",
            pattern.len()
        )));
    }
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => match chars.next() {
                Some('%') => out.push_str(&regex::escape("%")),
                Some('_') => out.push_str(&regex::escape("_")),
                Some(other) => out.push_str(&regex::escape(&other.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| Error::Execution(format!("Invalid LIKE pattern: {}", e)))
}
