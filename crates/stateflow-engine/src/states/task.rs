//! Task execution: resolve the `Resource` to an injected callable, vet
//! credentials, evaluate arguments, and run the call under the
//! timeout/heartbeat guard.

use tracing::debug;

use stateflow_core::error::Result;
use stateflow_core::types::{error_names, ErrorOutput, TaskState};

use super::{evaluate_args, StateContext, StateOutcome};
use crate::timeouts;

pub(super) async fn run(task: &TaskState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    if let Some(credentials) = &task.credentials {
        let evaluated = ctx.scope().evaluate(credentials)?;
        let accepted = match &ctx.options.on_credentials {
            Some(hook) => hook(&evaluated),
            None => true,
        };
        if !accepted {
            return Ok(StateOutcome::failure(ErrorOutput::with_cause(
                error_names::PERMISSIONS,
                format!("credentials for '{}' were rejected", task.resource),
            )));
        }
    }

    let args = evaluate_args(&task.common, ctx)?;

    let Some(resource) = ctx.options.resource_for(&task.resource) else {
        return Ok(StateOutcome::failure(ErrorOutput::with_cause(
            error_names::TASK_FAILED,
            format!("no resource registered for '{}'", task.resource),
        )));
    };

    let guard = timeouts::get_timeouts(task, &ctx.scope(), ctx.options)?;
    if let Some(secs) = guard.heartbeat_refused {
        return Ok(StateOutcome::failure(ErrorOutput::with_cause(
            error_names::HEARTBEAT_TIMEOUT,
            format!("no heartbeat received within {}s", secs),
        )));
    }

    debug!(state = %ctx.state_name, resource = %task.resource, "invoking task resource");

    let call = resource(args);
    let settled = match guard.timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(settled) => settled,
            Err(_) => {
                return Ok(StateOutcome::failure(ErrorOutput::with_cause(
                    error_names::TIMEOUT,
                    format!(
                        "'{}' did not complete within {:.3}s",
                        task.resource,
                        limit.as_secs_f64()
                    ),
                )))
            }
        },
        None => call.await,
    };

    match settled {
        Ok(Some(output)) => Ok(StateOutcome::success(output)),
        // A resource with no output leaves the state input in place.
        Ok(None) => Ok(StateOutcome::success(ctx.input.clone())),
        Err(e) => Ok(StateOutcome::failure(e.into())),
    }
}
