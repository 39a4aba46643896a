//! Expression evaluation for the interpreter.
//!
//! [`EvalScope`] bundles the values every expression can see (state input,
//! context object, workflow variables) with the active query language and
//! the evaluator to dispatch through. Template evaluation walks payload
//! objects and rewrites the expression-bearing parts per language.

pub(crate) mod functional;
pub(crate) mod intrinsics;
pub(crate) mod path;

use serde_json::{Map, Value};

use stateflow_core::error::{EngineError, Result};
use stateflow_core::traits::QueryEvaluator;
use stateflow_core::types::QueryLanguage;

pub use path::DefaultEvaluator;

#[derive(Clone, Copy)]
pub(crate) struct EvalScope<'a> {
    pub input: &'a Value,
    pub context: &'a Value,
    pub variables: &'a Map<String, Value>,
    pub language: QueryLanguage,
    pub evaluator: &'a dyn QueryEvaluator,
}

impl<'a> EvalScope<'a> {
    pub fn evaluate_path(&self, expr: &str) -> Result<Value> {
        self.evaluator
            .evaluate_path(expr, self.input, self.context, self.variables)
    }

    pub fn query_opt(&self, expr: &str) -> Result<Option<Value>> {
        self.evaluator
            .query_path_opt(expr, self.input, self.context, self.variables)
    }

    pub fn evaluate_functional(&self, expr: &str) -> Result<Value> {
        self.evaluator
            .evaluate_functional(expr, self.input, self.context, self.variables)
    }

    /// Evaluates a payload template per the active query language.
    pub fn evaluate(&self, template: &Value) -> Result<Value> {
        match self.language {
            QueryLanguage::JsonPath => self.eval_jsonpath_template(template),
            QueryLanguage::Jsonata => self.eval_jsonata_template(template),
        }
    }

    /// JSONata mode: strings wrapped in `{% ... %}` are expressions;
    /// everything else is literal.
    fn eval_jsonata_template(&self, template: &Value) -> Result<Value> {
        match template {
            Value::String(s) => match functional_body(s) {
                Some(body) => self.evaluate_functional(body),
                None => Ok(template.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.eval_jsonata_template(item))
                .collect::<Result<Vec<Value>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.eval_jsonata_template(value)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(template.clone()),
        }
    }

    /// JSONPath mode: string values rooted at `$` are path queries; object
    /// keys ending in `.$` hold a path or intrinsic whose result replaces
    /// the value (key loses the suffix); everything else is literal.
    fn eval_jsonpath_template(&self, template: &Value) -> Result<Value> {
        match template {
            Value::String(s) if s.starts_with('$') => self.eval_dynamic(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.eval_jsonpath_template(item))
                .collect::<Result<Vec<Value>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    match key.strip_suffix(".$") {
                        Some(bare) => {
                            let expr = value.as_str().ok_or_else(|| {
                                EngineError::Syntax(format!(
                                    "template field '{}' must hold a string expression",
                                    key
                                ))
                            })?;
                            out.insert(bare.to_string(), self.eval_dynamic(expr)?);
                        }
                        None => {
                            out.insert(key.clone(), self.eval_jsonpath_template(value)?);
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            _ => Ok(template.clone()),
        }
    }

    fn eval_dynamic(&self, expr: &str) -> Result<Value> {
        if intrinsics::is_intrinsic(expr) {
            return intrinsics::call(expr, self);
        }
        let value = self.evaluate_path(expr)?;
        // A single-element match collapses to the element itself.
        Ok(match value {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        })
    }
}

/// Returns the inner expression when `s` is a `{% ... %}` wrapper.
pub(crate) fn functional_body(s: &str) -> Option<&str> {
    s.strip_prefix("{%")
        .and_then(|rest| rest.strip_suffix("%}"))
        .map(str::trim)
}

/// Resolves a field that may be given as a literal number, a JSONata
/// expression, or a companion `...Path` field. At most one form may be set.
pub(crate) fn resolve_numeric_field(
    scope: &EvalScope<'_>,
    literal: Option<&Value>,
    path: Option<&str>,
    field: &str,
) -> Result<Option<f64>> {
    if literal.is_some() && path.is_some() {
        return Err(EngineError::Syntax(format!(
            "'{}' and '{}Path' are mutually exclusive",
            field, field
        )));
    }
    let value = match (literal, path) {
        (Some(Value::Number(n)), _) => Some(
            n.as_f64()
                .ok_or_else(|| EngineError::Syntax(format!("'{}' is not a number", field)))?,
        ),
        (Some(Value::String(s)), _) => {
            let body = functional_body(s).ok_or_else(|| {
                EngineError::Syntax(format!(
                    "'{}' must be a number or a {{% ... %}} expression",
                    field
                ))
            })?;
            let out = scope.evaluate_functional(body)?;
            Some(out.as_f64().ok_or_else(|| {
                EngineError::Expression(format!("'{}' expression must yield a number", field))
            })?)
        }
        (Some(_), _) => {
            return Err(EngineError::Syntax(format!(
                "'{}' must be a number or a string expression",
                field
            )))
        }
        (None, Some(p)) => {
            let out = scope.evaluate_path(p)?;
            Some(out.as_f64().ok_or_else(|| {
                EngineError::Expression(format!("'{}Path' must point at a number", field))
            })?)
        }
        (None, None) => None,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope<'a>(
        input: &'a Value,
        variables: &'a Map<String, Value>,
        language: QueryLanguage,
    ) -> EvalScope<'a> {
        EvalScope {
            input,
            context: &Value::Null,
            variables,
            language,
            evaluator: &DefaultEvaluator,
        }
    }

    #[test]
    fn test_jsonpath_template() {
        let input = json!({"user": {"id": 7}, "tags": ["x"]});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::JsonPath);
        let template = json!({
            "static": "kept",
            "id.$": "$.user.id",
            "nested": { "tag.$": "$.tags[0]" }
        });
        let got = s.evaluate(&template).unwrap();
        assert_eq!(got, json!({"static": "kept", "id": 7, "nested": {"tag": "x"}}));
    }

    #[test]
    fn test_jsonpath_template_dollar_string_values() {
        let input = json!({"a": 1, "tags": ["x", "y"]});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::JsonPath);
        let template = json!({
            "copied": "$.a",
            "plain": "a literal",
            "list": ["$.tags", "kept"]
        });
        let got = s.evaluate(&template).unwrap();
        assert_eq!(
            got,
            json!({"copied": 1, "plain": "a literal", "list": [["x", "y"], "kept"]})
        );
    }

    #[test]
    fn test_jsonpath_template_rejects_non_string_expr() {
        let input = json!({});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::JsonPath);
        assert!(s.evaluate(&json!({"bad.$": 3})).is_err());
    }

    #[test]
    fn test_jsonpath_template_intrinsic() {
        let input = json!({"n": 2});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::JsonPath);
        let got = s
            .evaluate(&json!({"msg.$": "States.Format('got {}', $.n)"}))
            .unwrap();
        assert_eq!(got, json!({"msg": "got 2"}));
    }

    #[test]
    fn test_jsonata_template() {
        let input = json!({"count": 4});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::Jsonata);
        let template = json!({
            "plain": "{ not an expression }",
            "doubled": "{% $states.input.count * 2 %}",
            "list": ["{% 1 + 1 %}", "literal"]
        });
        let got = s.evaluate(&template).unwrap();
        assert_eq!(
            got,
            json!({"plain": "{ not an expression }", "doubled": 8, "list": [2, "literal"]})
        );
    }

    #[test]
    fn test_resolve_numeric_field() {
        let input = json!({"n": 30});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::JsonPath);

        assert_eq!(
            resolve_numeric_field(&s, Some(&json!(5)), None, "TimeoutSeconds").unwrap(),
            Some(5.0)
        );
        assert_eq!(
            resolve_numeric_field(&s, None, Some("$.n"), "TimeoutSeconds").unwrap(),
            Some(30.0)
        );
        assert_eq!(
            resolve_numeric_field(&s, None, None, "TimeoutSeconds").unwrap(),
            None
        );
        assert!(
            resolve_numeric_field(&s, Some(&json!(5)), Some("$.n"), "TimeoutSeconds").is_err()
        );
    }

    #[test]
    fn test_resolve_numeric_field_jsonata() {
        let input = json!({"n": 3});
        let vars = Map::new();
        let s = scope(&input, &vars, QueryLanguage::Jsonata);
        let got = resolve_numeric_field(
            &s,
            Some(&json!("{% $states.input.n + 1 %}")),
            None,
            "TimeoutSeconds",
        )
        .unwrap();
        assert_eq!(got, Some(4.0));
    }
}
