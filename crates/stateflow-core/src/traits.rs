use serde_json::{Map, Value};

use crate::error::Result;

/// Strategy object for the two expression grammars the engine consumes.
///
/// The grammars themselves are external collaborators: the engine only ever
/// asks to evaluate a path-query string or a functional-expression body
/// against JSON values. One evaluator is selected per run and threaded
/// through execution; the built-in adapter in `stateflow-engine` covers the
/// subset the interpreter needs, and a full JSONPath/JSONata implementation
/// can be injected here.
pub trait QueryEvaluator: Send + Sync {
    /// Evaluate a path-query expression (`$`, `$$`, `$variable` roots)
    /// against `input`. Fails if the path does not match.
    fn evaluate_path(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Value>;

    /// Like [`evaluate_path`](Self::evaluate_path), but yields `None` for a
    /// non-matching path. Used for `IsPresent` checks.
    fn query_path_opt(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Option<Value>>;

    /// Evaluate a functional-language expression body (wrapping delimiters
    /// already stripped) against `{ input, context, variables }`.
    fn evaluate_functional(
        &self,
        expr: &str,
        input: &Value,
        context: &Value,
        variables: &Map<String, Value>,
    ) -> Result<Value>;
}
