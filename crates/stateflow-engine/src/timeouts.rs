//! Timeout and heartbeat guard for Task states.
//!
//! Resolves `TaskTimeout(Path)` and `HeartbeatSeconds(Path)` into a
//! [`TaskGuard`] before the resource call. The heartbeat channel belongs to
//! the host: the resolved seconds are offered to the `on_heartbeat_seconds`
//! predicate, and a refusal fails the task immediately rather than after a
//! wait the engine cannot observe.

use std::time::Duration;

use stateflow_core::error::Result;
use stateflow_core::options::RunOptions;
use stateflow_core::types::TaskState;

use crate::expr::{resolve_numeric_field, EvalScope};

#[derive(Debug, Default)]
pub(crate) struct TaskGuard {
    pub timeout: Option<Duration>,
    /// Set when a heartbeat was declared and the host predicate refused it
    /// (or no predicate was supplied).
    pub heartbeat_refused: Option<f64>,
}

pub(crate) fn get_timeouts(
    task: &TaskState,
    scope: &EvalScope<'_>,
    options: &RunOptions,
) -> Result<TaskGuard> {
    let mut guard = TaskGuard::default();

    if let Some(secs) = resolve_numeric_field(
        scope,
        task.task_timeout.as_ref(),
        task.task_timeout_path.as_deref(),
        "TaskTimeout",
    )? {
        guard.timeout = Some(Duration::from_secs_f64(secs.max(0.0)));
    }

    if let Some(secs) = resolve_numeric_field(
        scope,
        task.heartbeat_seconds.as_ref(),
        task.heartbeat_seconds_path.as_deref(),
        "HeartbeatSeconds",
    )? {
        let accepted = options
            .on_heartbeat_seconds
            .as_ref()
            .is_some_and(|hook| hook(secs));
        if !accepted {
            guard.heartbeat_refused = Some(secs);
        }
    }

    Ok(guard)
}
