//! Function registry: immediate, scalar and aggregate functions usable in
//! query text, plus hooks for registering custom ones.
//!
//! Lookup is case-sensitive; builtins are registered under lowercase names.
//! Immediate functions take no arguments and are evaluated once per query
//! (`today()`, `now()`). Scalar functions map evaluated argument lists to a
//! value per record. Aggregate functions fold the column of values collected
//! over one group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::executor::helpers::compare_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Immediate,
    Scalar,
    Aggregate,
}

/// Shared function implementation. Scalars receive their evaluated argument
/// list; aggregates receive the per-group column of values.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionRegistry {
    entries: HashMap<String, (FunctionKind, FunctionImpl)>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_args(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::Execution(format!(
            "{}() expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn number_arg(name: &str, value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(Error::Execution(format!(
            "{}() expects a number argument, got {}",
            name, other
        ))),
    }
}

fn string_arg(name: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(Error::Execution(format!(
            "{}() expects a string argument, got {}",
            name, other
        ))),
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Pull a `YYYY-MM-DD...` component out of a date or datetime string.
fn temporal_component(name: &str, value: &Value, range: std::ops::Range<usize>) -> Result<Value> {
    let Some(s) = string_arg(name, value)? else {
        return Ok(Value::Null);
    };
    let valid = if range.start >= 11 {
        crate::ast::is_valid_datetime(&s)
    } else {
        crate::ast::is_valid_date(&s) || crate::ast::is_valid_datetime(&s)
    };
    if !valid {
        return Err(Error::Execution(format!(
            "{}() expects a date or datetime argument, got {}",
            name, s
        )));
    }
    let n: f64 = s[range].parse().map_err(|_| {
        Error::Execution(format!("{}(): malformed temporal value {}", name, s))
    })?;
    Ok(number_value(n))
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry.install_builtins();
        registry
    }

    pub fn register_immediate(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.entries
            .insert(name.into(), (FunctionKind::Immediate, Arc::new(f)));
    }

    pub fn register_scalar(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.entries
            .insert(name.into(), (FunctionKind::Scalar, Arc::new(f)));
    }

    pub fn register_aggregate(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.entries
            .insert(name.into(), (FunctionKind::Aggregate, Arc::new(f)));
    }

    pub fn kind(&self, name: &str) -> Option<FunctionKind> {
        self.entries.get(name).map(|(k, _)| *k)
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.kind(name) == Some(FunctionKind::Aggregate)
    }

    /// Invoke a function by name. Unknown names fail here, at execution
    /// time, so a registry extended after parsing still applies.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let (_, f) = self
            .entries
            .get(name)
            .ok_or_else(|| Error::Execution(format!("Unknown function: {}", name)))?;
        f(args)
    }

    fn install_builtins(&mut self) {
        self.register_immediate("today", |args| {
            check_args("today", args, 0)?;
            Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string()))
        });
        self.register_immediate("now", |args| {
            check_args("now", args, 0)?;
            Ok(Value::String(
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ))
        });

        self.register_scalar("to_string", |args| {
            check_args("to_string", args, 1)?;
            Ok(match &args[0] {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s.clone()),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                other => Value::String(other.to_string()),
            })
        });
        self.register_scalar("to_number", |args| {
            check_args("to_number", args, 1)?;
            Ok(match &args[0] {
                Value::Number(n) => Value::Number(n.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(number_value)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        });
        self.register_scalar("to_date", |args| {
            check_args("to_date", args, 1)?;
            Ok(match &args[0] {
                Value::String(s) if crate::ast::is_valid_date(s) => Value::String(s.clone()),
                Value::String(s) if crate::ast::is_valid_datetime(s) => {
                    Value::String(s[0..10].to_string())
                }
                _ => Value::Null,
            })
        });

        self.register_scalar("upper", |args| {
            check_args("upper", args, 1)?;
            Ok(string_arg("upper", &args[0])?
                .map(|s| Value::String(s.to_uppercase()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("lower", |args| {
            check_args("lower", args, 1)?;
            Ok(string_arg("lower", &args[0])?
                .map(|s| Value::String(s.to_lowercase()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("trim", |args| {
            check_args("trim", args, 1)?;
            Ok(string_arg("trim", &args[0])?
                .map(|s| Value::String(s.trim().to_string()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("concat", |args| {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::Null => {}
                    Value::String(s) => out.push_str(s),
                    Value::Number(n) => out.push_str(&n.to_string()),
                    Value::Bool(b) => out.push_str(&b.to_string()),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        });

        self.register_scalar("abs", |args| {
            check_args("abs", args, 1)?;
            Ok(number_arg("abs", &args[0])?
                .map(|n| number_value(n.abs()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("ceil", |args| {
            check_args("ceil", args, 1)?;
            Ok(number_arg("ceil", &args[0])?
                .map(|n| number_value(n.ceil()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("floor", |args| {
            check_args("floor", args, 1)?;
            Ok(number_arg("floor", &args[0])?
                .map(|n| number_value(n.floor()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("round", |args| {
            check_args("round", args, 1)?;
            Ok(number_arg("round", &args[0])?
                .map(|n| number_value(n.round()))
                .unwrap_or(Value::Null))
        });

        self.register_scalar("calendar_year", |args| {
            check_args("calendar_year", args, 1)?;
            temporal_component("calendar_year", &args[0], 0..4)
        });
        self.register_scalar("calendar_month", |args| {
            check_args("calendar_month", args, 1)?;
            temporal_component("calendar_month", &args[0], 5..7)
        });
        self.register_scalar("day_in_month", |args| {
            check_args("day_in_month", args, 1)?;
            temporal_component("day_in_month", &args[0], 8..10)
        });
        self.register_scalar("hour_in_day", |args| {
            check_args("hour_in_day", args, 1)?;
            temporal_component("hour_in_day", &args[0], 11..13)
        });

        self.register_aggregate("count", |values| {
            let n = values.iter().filter(|v| !v.is_null()).count();
            Ok(number_value(n as f64))
        });
        // null is a value of its own here, unlike count(field).
        self.register_aggregate("count_distinct", |values| {
            let mut seen = HashSet::new();
            for v in values {
                seen.insert(serde_json::to_string(v).unwrap_or_default());
            }
            Ok(number_value(seen.len() as f64))
        });
        self.register_aggregate("sum", |values| {
            let mut sum = 0.0;
            let mut any = false;
            for v in values {
                if let Some(n) = number_arg("sum", v)? {
                    sum += n;
                    any = true;
                }
            }
            Ok(if any { number_value(sum) } else { Value::Null })
        });
        self.register_aggregate("avg", |values| {
            let mut sum = 0.0;
            let mut count = 0usize;
            for v in values {
                if let Some(n) = number_arg("avg", v)? {
                    sum += n;
                    count += 1;
                }
            }
            Ok(if count > 0 {
                number_value(sum / count as f64)
            } else {
                Value::Null
            })
        });
        self.register_aggregate("min", |values| Ok(fold_extreme(values, false)));
        self.register_aggregate("max", |values| Ok(fold_extreme(values, true)));
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn fold_extreme(values: &[Value], want_max: bool) -> Value {
    let mut best: Option<&Value> = None;
    for v in values.iter().filter(|v| !v.is_null()) {
        best = match best {
            None => Some(v),
            Some(b) => match compare_values(v, b) {
                Some(std::cmp::Ordering::Greater) if want_max => Some(v),
                Some(std::cmp::Ordering::Less) if !want_max => Some(v),
                _ => Some(b),
            },
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
