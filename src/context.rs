//! Context-aware documents: default values plus overrides gated by conditions.
//!
//! A tenant document in this shape looks like
//!
//! ```json
//! {
//!   "default_configs": {"timeout": 30, "theme": {"color": "blue"}},
//!   "contexts": [
//!     {"condition": {"==": [{"var": "city"}, "Bangalore"]}, "override_with_keys": ["blr"]}
//!   ],
//!   "overrides": {"blr": {"timeout": 10}}
//! }
//! ```
//!
//! Evaluating it against a request context starts from `default_configs` and applies, in list
//! order, the overrides of every context whose condition holds. Conditions are JSON Logic rules;
//! the operators below are supported, anything else is rejected.

use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{CacError, Result};
use crate::merge::MergeStrategy;

/// One conditional override entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Context {
    pub condition: Value,
    pub override_with_keys: Vec<String>,
}

/// A tenant document split into its context-aware parts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContextDocument {
    #[serde(default)]
    pub contexts: Vec<Context>,
    #[serde(default)]
    pub overrides: Map<String, Value>,
    pub default_configs: Map<String, Value>,
}

impl ContextDocument {
    /// Read a fetched document as a context-aware one.
    pub fn from_document(document: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(document.clone()))
            .map_err(|e| CacError::InvalidArgument(format!("configuration is not a context-aware document: {}", e)))
    }

    /// Resolve the document for `context`, layering matching overrides with `strategy`.
    pub fn eval(&self, context: &Map<String, Value>, strategy: MergeStrategy) -> Result<Map<String, Value>> {
        let mut resolved = self.default_configs.clone();
        for entry in &self.contexts {
            if !matches(&entry.condition, context)? {
                continue;
            }
            for key in &entry.override_with_keys {
                match self.overrides.get(key) {
                    Some(Value::Object(layer)) => resolved = strategy.apply(&resolved, layer),
                    Some(_) => {
                        return Err(CacError::InvalidArgument(format!("override `{}` is not an object", key)));
                    }
                    None => tracing::warn!(override_key = key.as_str(), "context references a missing override"),
                }
            }
        }
        Ok(resolved)
    }
}

/// Whether `condition` holds for `context`.
pub fn matches(condition: &Value, context: &Map<String, Value>) -> Result<bool> {
    Ok(truthy(&evaluate(condition, context)?))
}

fn evaluate(rule: &Value, data: &Map<String, Value>) -> Result<Value> {
    let operation = match rule {
        Value::Object(operation) => operation,
        Value::Array(items) => {
            return items
                .iter()
                .map(|item| evaluate(item, data))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array);
        }
        literal => return Ok(literal.clone()),
    };

    let mut entries = operation.iter();
    let (Some((operator, raw_args)), None) = (entries.next(), entries.next()) else {
        return Err(CacError::InvalidArgument(
            "condition operations must have exactly one operator".to_string(),
        ));
    };

    if operator == "var" {
        return Ok(var(raw_args, data));
    }

    let args = match raw_args {
        Value::Array(items) => items.iter().map(|arg| evaluate(arg, data)).collect::<Result<Vec<_>>>()?,
        single => vec![evaluate(single, data)?],
    };

    let result = match operator.as_str() {
        "==" => pair(&args).is_some_and(|(a, b)| loose_eq(a, b)),
        "!=" => pair(&args).is_some_and(|(a, b)| !loose_eq(a, b)),
        "===" => pair(&args).is_some_and(|(a, b)| a == b),
        "!==" => pair(&args).is_some_and(|(a, b)| a != b),
        "!" => !args.first().is_some_and(truthy),
        "!!" => args.first().is_some_and(truthy),
        "and" => args.iter().all(truthy),
        "or" => args.iter().any(truthy),
        "in" => pair(&args).is_some_and(|(needle, haystack)| contains(haystack, needle)),
        "<" => chain(&args, |o| o == Ordering::Less),
        "<=" => chain(&args, |o| o != Ordering::Greater),
        ">" => chain(&args, |o| o == Ordering::Greater),
        ">=" => chain(&args, |o| o != Ordering::Less),
        other => {
            return Err(CacError::InvalidArgument(format!(
                "unsupported condition operator `{}`",
                other
            )))
        }
    };
    Ok(Value::Bool(result))
}

/// `{"var": "a.b"}` or `{"var": ["a.b", default]}`; a missing path yields the default or null.
fn var(args: &Value, data: &Map<String, Value>) -> Value {
    let (path, default) = match args {
        Value::Array(items) => (items.first().cloned().unwrap_or(Value::Null), items.get(1).cloned()),
        other => (other.clone(), None),
    };
    let path = match path {
        Value::String(path) => path,
        Value::Number(n) => n.to_string(),
        _ => return Value::Object(data.clone()),
    };
    if path.is_empty() {
        return Value::Object(data.clone());
    }

    let mut segments = path.split('.');
    let found = segments.next().and_then(|first| {
        segments.try_fold(data.get(first)?, |current, segment| current.as_object()?.get(segment))
    });
    found.cloned().or(default).unwrap_or(Value::Null)
}

fn pair(args: &[Value]) -> Option<(&Value, &Value)> {
    match args {
        [a, b, ..] => Some((a, b)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (number(a), number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.iter().any(|item| loose_eq(item, needle)),
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => number(a)?.partial_cmp(&number(b)?),
    }
}

/// `{"<=": [lo, x, hi]}` checks both links, so between-style rules work.
fn chain(args: &[Value], accept: impl Fn(Ordering) -> bool) -> bool {
    args.len() >= 2 && args.windows(2).all(|w| compare(&w[0], &w[1]).is_some_and(&accept))
}
