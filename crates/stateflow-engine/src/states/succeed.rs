//! Succeed execution: terminal success carrying the effective input.

use stateflow_core::error::Result;
use stateflow_core::types::SucceedState;

use super::{StateContext, StateOutcome};

pub(super) fn run(_succeed: &SucceedState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    Ok(StateOutcome::success(ctx.input.clone()))
}
