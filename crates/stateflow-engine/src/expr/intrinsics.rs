//! Intrinsic functions available to `.$` fields in JSONPath payload
//! templates: `States.Format`, `States.Array`, `States.StringToJson`, and
//! `States.JsonToString`.

use serde_json::Value;

use stateflow_core::error::{EngineError, Result};

use super::EvalScope;

pub(crate) fn is_intrinsic(expr: &str) -> bool {
    expr.starts_with("States.") && expr.ends_with(')')
}

pub(crate) fn call(expr: &str, scope: &EvalScope<'_>) -> Result<Value> {
    let open = expr
        .find('(')
        .ok_or_else(|| bad_call(expr, "missing '('"))?;
    let name = &expr[..open];
    let body = expr[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| bad_call(expr, "missing closing ')'"))?;

    let args = split_args(body, expr)?
        .into_iter()
        .map(|arg| eval_arg(arg, scope))
        .collect::<Result<Vec<Value>>>()?;

    match name {
        "States.Format" => format_fn(expr, &args),
        "States.Array" => Ok(Value::Array(args)),
        "States.StringToJson" => {
            let [Value::String(s)] = args.as_slice() else {
                return Err(bad_call(expr, "expects a single string argument"));
            };
            serde_json::from_str(s).map_err(|e| {
                EngineError::Expression(format!("States.StringToJson: {}", e))
            })
        }
        "States.JsonToString" => {
            let [value] = args.as_slice() else {
                return Err(bad_call(expr, "expects a single argument"));
            };
            Ok(Value::String(value.to_string()))
        }
        _ => Err(bad_call(expr, "unknown intrinsic")),
    }
}

fn format_fn(expr: &str, args: &[Value]) -> Result<Value> {
    let Some((Value::String(template), rest)) = args.split_first() else {
        return Err(bad_call(expr, "first argument must be a string template"));
    };
    let mut out = String::new();
    let mut remaining = template.as_str();
    let mut fills = rest.iter();
    while let Some(at) = remaining.find("{}") {
        out.push_str(&remaining[..at]);
        let fill = fills
            .next()
            .ok_or_else(|| bad_call(expr, "more placeholders than arguments"))?;
        match fill {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        remaining = &remaining[at + 2..];
    }
    if fills.next().is_some() {
        return Err(bad_call(expr, "more arguments than placeholders"));
    }
    out.push_str(remaining);
    Ok(Value::String(out))
}

/// Splits the argument list at top-level commas, honoring single-quoted
/// strings and nested parentheses.
fn split_args<'a>(body: &'a str, whole: &str) -> Result<Vec<&'a str>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0;
    let bytes = body.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| bad_call(whole, "unbalanced parentheses"))?;
            }
            b',' if !in_string && depth == 0 => {
                args.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_string || depth != 0 {
        return Err(bad_call(whole, "unbalanced quotes or parentheses"));
    }
    args.push(body[start..].trim());
    Ok(args)
}

fn eval_arg(arg: &str, scope: &EvalScope<'_>) -> Result<Value> {
    if is_intrinsic(arg) {
        return call(arg, scope);
    }
    if arg.starts_with('$') {
        return scope.evaluate_path(arg);
    }
    if let Some(inner) = arg.strip_prefix('\'') {
        let s = inner
            .strip_suffix('\'')
            .ok_or_else(|| bad_call(arg, "unterminated string"))?;
        return Ok(Value::String(s.to_string()));
    }
    match arg {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(n) = serde_json::from_str::<serde_json::Number>(arg) {
        return Ok(Value::Number(n));
    }
    Err(bad_call(arg, "unrecognized argument"))
}

fn bad_call(expr: &str, why: &str) -> EngineError {
    EngineError::Expression(format!("intrinsic '{}': {}", expr, why))
}
