//! The ordered output pipeline applied to a state's raw result:
//! Assign → Output/ResultSelector → ResultPath → OutputPath.
//!
//! Each step is optional and language-gated; using a field under the wrong
//! query language is a definition error, not a silent skip. A Catcher
//! substitutes for the state as the field source when an error is being
//! routed, carrying only the subset of fields a catch transition shapes.

use serde_json::{Map, Value};

use stateflow_core::error::{EngineError, Result};
use stateflow_core::traits::QueryEvaluator;
use stateflow_core::types::{Catcher, CommonFields, QueryLanguage};

use crate::expr::{path, EvalScope};

/// Variable names live in a flat namespace with one reserved root.
const RESERVED_VARIABLE: &str = "states";

/// The output-shaping fields of either a state or a Catcher.
pub(crate) struct OutputSource<'a> {
    assign: Option<&'a Map<String, Value>>,
    output: Option<&'a Value>,
    result_selector: Option<&'a Value>,
    result_path: Option<&'a Option<String>>,
    output_path: Option<&'a Option<String>>,
}

impl<'a> OutputSource<'a> {
    pub fn from_common(common: &'a CommonFields) -> Self {
        Self {
            assign: common.assign.as_ref(),
            output: common.output.as_ref(),
            result_selector: common.result_selector.as_ref(),
            result_path: common.result_path.as_ref(),
            output_path: common.output_path.as_ref(),
        }
    }

    pub fn from_catcher(catcher: &'a Catcher) -> Self {
        Self {
            assign: catcher.assign.as_ref(),
            output: catcher.output.as_ref(),
            result_selector: None,
            result_path: catcher.result_path.as_ref(),
            output_path: None,
        }
    }
}

/// Runs the pipeline over `result`, mutating `variables` through `Assign`
/// and returning the state's final output.
pub(crate) fn evaluate_output(
    source: &OutputSource<'_>,
    raw_input: &Value,
    result: Value,
    context: &Value,
    language: QueryLanguage,
    evaluator: &dyn QueryEvaluator,
    variables: &mut Map<String, Value>,
) -> Result<Value> {
    match language {
        QueryLanguage::JsonPath => {
            if source.output.is_some() {
                return Err(EngineError::Syntax(
                    "'Output' requires the JSONata query language".into(),
                ));
            }
        }
        QueryLanguage::Jsonata => {
            for (field, present) in [
                ("ResultSelector", source.result_selector.is_some()),
                ("ResultPath", source.result_path.is_some()),
                ("OutputPath", source.output_path.is_some()),
            ] {
                if present {
                    return Err(EngineError::Syntax(format!(
                        "'{}' requires the JSONPath query language",
                        field
                    )));
                }
            }
        }
    }

    // Assign sees the raw result as its input.
    if let Some(assign) = source.assign {
        let scope = EvalScope {
            input: &result,
            context,
            variables,
            language,
            evaluator,
        };
        let bound = scope.evaluate(&Value::Object(assign.clone()))?;
        let Value::Object(bound) = bound else {
            return Err(EngineError::Syntax("'Assign' must be an object".into()));
        };
        for (name, value) in bound {
            if name == RESERVED_VARIABLE {
                return Err(EngineError::Syntax(
                    "'states' is reserved and cannot be assigned".into(),
                ));
            }
            variables.insert(name, value);
        }
    }

    let scope = EvalScope {
        input: &result,
        context,
        variables,
        language,
        evaluator,
    };

    if let Some(output) = source.output {
        return scope.evaluate(output);
    }

    let working = match source.result_selector {
        Some(selector) => scope.evaluate(selector)?,
        None => result,
    };

    let placed = match source.result_path {
        None => working,
        // Explicit null discards the result; the raw input flows on.
        Some(None) => raw_input.clone(),
        Some(Some(p)) => {
            let mut dest = raw_input.clone();
            path::splice(&mut dest, p, working)?;
            dest
        }
    };

    match source.output_path {
        None => Ok(placed),
        Some(None) => Ok(Value::Object(Map::new())),
        Some(Some(p)) => {
            let scope = EvalScope {
                input: &placed,
                context,
                variables,
                language,
                evaluator,
            };
            scope.evaluate_path(p)
        }
    }
}
