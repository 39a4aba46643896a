//! Fail execution: build the terminal `ErrorOutput` from the declared
//! `Error`/`Cause` forms. The result routes through Retry/Catch like any
//! other failure, so a Fail state can be caught by an enclosing machine.

use serde_json::Value;

use stateflow_core::error::{EngineError, Result};
use stateflow_core::types::{error_names, ErrorOutput, FailState};

use super::{StateContext, StateOutcome};
use crate::expr::functional_body;

pub(super) fn run(fail: &FailState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    let error = resolve_field(ctx, fail.error.as_ref(), fail.error_path.as_deref(), "Error")?
        .unwrap_or_else(|| error_names::BRANCH_FAILED.to_string());
    let cause = resolve_field(ctx, fail.cause.as_ref(), fail.cause_path.as_deref(), "Cause")?;
    Ok(StateOutcome::failure(ErrorOutput::new(error, cause)))
}

fn resolve_field(
    ctx: &StateContext<'_>,
    literal: Option<&Value>,
    path: Option<&str>,
    field: &str,
) -> Result<Option<String>> {
    if literal.is_some() && path.is_some() {
        return Err(EngineError::Syntax(format!(
            "'{}' and '{}Path' are mutually exclusive",
            field, field
        )));
    }
    let resolved = match (literal, path) {
        (Some(Value::String(s)), _) => match functional_body(s) {
            Some(body) => Some(ctx.scope().evaluate_functional(body)?),
            None => Some(Value::String(s.clone())),
        },
        (Some(_), _) => {
            return Err(EngineError::Syntax(format!(
                "'{}' must be a string",
                field
            )))
        }
        (None, Some(p)) => Some(ctx.scope().evaluate_path(p)?),
        (None, None) => None,
    };
    match resolved {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(EngineError::Expression(format!(
            "'{}' must resolve to a string",
            field
        ))),
    }
}
