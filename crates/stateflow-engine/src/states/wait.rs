//! Wait execution: resolve the declared form into an absolute deadline and
//! hand it to the `on_wait` callback. The engine itself never sleeps.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use stateflow_core::error::{EngineError, Result};
use stateflow_core::types::WaitState;

use super::{StateContext, StateOutcome};
use crate::expr::{functional_body, resolve_numeric_field};

pub(super) async fn run(wait: &WaitState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    let declared = [
        wait.seconds.is_some(),
        wait.timestamp.is_some(),
        wait.seconds_path.is_some(),
        wait.timestamp_path.is_some(),
    ]
    .into_iter()
    .filter(|&p| p)
    .count();
    if declared != 1 {
        return Err(EngineError::Syntax(
            "Wait state requires exactly one of 'Seconds', 'Timestamp', 'SecondsPath', \
             'TimestampPath'"
                .into(),
        ));
    }

    let scope = ctx.scope();
    let now = ctx.options.now();
    let (deadline, seconds) = if wait.seconds.is_some() || wait.seconds_path.is_some() {
        let secs = resolve_numeric_field(
            &scope,
            wait.seconds.as_ref(),
            wait.seconds_path.as_deref(),
            "Seconds",
        )?
        .ok_or_else(|| EngineError::Syntax("'Seconds' did not resolve".into()))?;
        if secs < 0.0 {
            return Err(EngineError::Syntax("'Seconds' must be non-negative".into()));
        }
        let deadline = now + Duration::milliseconds((secs * 1000.0).round() as i64);
        (deadline, Some(secs))
    } else {
        let raw = match (&wait.timestamp, &wait.timestamp_path) {
            (Some(Value::String(s)), _) => match functional_body(s) {
                Some(body) => scope.evaluate_functional(body)?,
                None => Value::String(s.clone()),
            },
            (Some(_), _) => {
                return Err(EngineError::Syntax("'Timestamp' must be a string".into()))
            }
            (None, Some(p)) => scope.evaluate_path(p)?,
            (None, None) => unreachable!("exactly one Wait form checked above"),
        };
        let Value::String(text) = raw else {
            return Err(EngineError::Expression(
                "Wait timestamp must resolve to a string".into(),
            ));
        };
        let parsed = DateTime::parse_from_rfc3339(&text).map_err(|e| {
            EngineError::Expression(format!("invalid Wait timestamp '{}': {}", text, e))
        })?;
        (parsed.with_timezone(&Utc), None)
    };

    debug!(state = %ctx.state_name, deadline = %deadline, "wait resolved");
    if let Some(hook) = &ctx.options.on_wait {
        hook(deadline, seconds).await;
    }
    Ok(StateOutcome::success(ctx.input.clone()))
}
