//! Built-in path-query adapter.
//!
//! Covers the dot/bracket subset the interpreter needs: `$` for the state
//! input, `$$` for the context object, `$name` for a variable, with `.key`,
//! `[0]`, and `['key']` navigation. A full JSONPath implementation can be
//! injected through [`QueryEvaluator`] instead.

use serde_json::{Map, Value};

use stateflow_core::error::{EngineError, Result};
use stateflow_core::traits::QueryEvaluator;

use super::functional;

pub struct DefaultEvaluator;

impl QueryEvaluator for DefaultEvaluator {
    fn evaluate_path(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Value> {
        query(expr, input, context, variables)?.ok_or_else(|| {
            EngineError::Expression(format!("path '{}' did not match", expr))
        })
    }

    fn query_path_opt(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        query(expr, input, context, variables)
    }

    fn evaluate_functional(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Value> {
        functional::evaluate(expr, input, context, variables)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
}

/// Resolve a path expression, returning `None` when it does not match.
fn query(
    expr: &str,
    input: &Value,
    context: &Value,
    variables: &Map<String, Value>,
) -> Result<Option<Value>> {
    let (root, rest) = split_root(expr, input, context, variables)?;
    let root = match root {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut current = root;
    for segment in parse_segments(rest, expr)? {
        let next = match (&segment, current) {
            (Segment::Key(k), Value::Object(m)) => m.get(k).cloned(),
            (Segment::Index(i), Value::Array(a)) => a.get(*i).cloned(),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Splits the expression into its root value and the remaining segments.
fn split_root<'a>(
    expr: &'a str,
    input: &Value,
    context: &Value,
    variables: &Map<String, Value>,
) -> Result<(Option<Value>, &'a str)> {
    if let Some(rest) = expr.strip_prefix("$$") {
        return Ok((Some(context.clone()), rest));
    }
    let Some(rest) = expr.strip_prefix('$') else {
        return Err(EngineError::Expression(format!(
            "path '{}' must begin with '$'",
            expr
        )));
    };
    if rest.is_empty() || rest.starts_with('.') || rest.starts_with('[') {
        return Ok((Some(input.clone()), rest));
    }
    // Variable reference: $name with optional trailing navigation.
    let split = rest
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(split);
    Ok((variables.get(name).cloned(), tail))
}

pub(crate) fn parse_segments(path: &str, whole: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                    i += 1;
                }
                if start == i {
                    return Err(bad_path(whole));
                }
                segments.push(Segment::Key(path[start..i].to_string()));
            }
            b'[' => {
                i += 1;
                if i < bytes.len() && bytes[i] == b'\'' {
                    i += 1;
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'\'' {
                        i += 1;
                    }
                    if i >= bytes.len() {
                        return Err(bad_path(whole));
                    }
                    segments.push(Segment::Key(path[start..i].to_string()));
                    i += 1; // closing quote
                    if i >= bytes.len() || bytes[i] != b']' {
                        return Err(bad_path(whole));
                    }
                    i += 1;
                } else {
                    let start = i;
                    while i < bytes.len() && bytes[i] != b']' {
                        i += 1;
                    }
                    if i >= bytes.len() || start == i {
                        return Err(bad_path(whole));
                    }
                    let index: usize = path[start..i]
                        .parse()
                        .map_err(|_| bad_path(whole))?;
                    segments.push(Segment::Index(index));
                    i += 1;
                }
            }
            _ => return Err(bad_path(whole)),
        }
    }
    Ok(segments)
}

fn bad_path(expr: &str) -> EngineError {
    EngineError::Expression(format!("malformed path '{}'", expr))
}

/// Splice `value` into `dest` at the reference path, creating intermediate
/// objects as needed. `$` replaces `dest` wholesale.
pub(crate) fn splice(dest: &mut Value, path: &str, value: Value) -> Result<()> {
    let rest = path.strip_prefix('$').ok_or_else(|| {
        EngineError::Expression(format!("reference path '{}' must begin with '$'", path))
    })?;
    let segments = parse_segments(rest, path)?;
    if segments.is_empty() {
        *dest = value;
        return Ok(());
    }
    let mut current = dest;
    for (i, segment) in segments.iter().enumerate() {
        let key = match segment {
            Segment::Key(k) => k,
            Segment::Index(_) => {
                return Err(EngineError::Expression(format!(
                    "reference path '{}' must only contain field names",
                    path
                )))
            }
        };
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return Err(bad_path(path));
        };
        if i == segments.len() - 1 {
            map.insert(key.clone(), value);
            return Ok(());
        }
        current = map.entry(key.clone()).or_insert(Value::Object(Map::new()));
    }
    unreachable!("loop always returns on the last segment")
}
