//! Pass execution: a virtual task whose result is the literal `Result`
//! field, the evaluated argument template, or the input unchanged.

use stateflow_core::error::{EngineError, Result};
use stateflow_core::types::{PassState, QueryLanguage};

use super::{evaluate_args, StateContext, StateOutcome};

pub(super) fn run(pass: &PassState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    if pass.result.is_some() && ctx.language == QueryLanguage::Jsonata {
        return Err(EngineError::Syntax(
            "'Result' requires the JSONPath query language; use 'Output' instead".into(),
        ));
    }
    let output = match &pass.result {
        Some(result) => result.clone(),
        None => evaluate_args(&pass.common, ctx)?,
    };
    Ok(StateOutcome::success(output))
}
