//! Concurrency policy resolvers for Map fan-out.

use stateflow_core::error::{EngineError, Result};
use stateflow_core::types::MapState;

use crate::expr::{resolve_numeric_field, EvalScope};

/// Effective fan-out width. `0` means unbounded; `1` means strictly
/// sequential in input order.
pub(crate) fn resolve_max_concurrency(map: &MapState, scope: &EvalScope<'_>) -> Result<usize> {
    let value = resolve_numeric_field(
        scope,
        map.max_concurrency.as_ref(),
        map.max_concurrency_path.as_deref(),
        "MaxConcurrency",
    )?;
    match value {
        None => Ok(0),
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        Some(_) => Err(EngineError::Syntax(
            "'MaxConcurrency' must be a non-negative integer".into(),
        )),
    }
}

/// How many item failures the Map absorbs before failing as a whole.
/// Percentage forms convert via `floor(itemCount * percent / 100)`.
pub(crate) fn resolve_tolerated_failures(
    map: &MapState,
    scope: &EvalScope<'_>,
    item_count: usize,
) -> Result<usize> {
    let count = resolve_numeric_field(
        scope,
        map.tolerated_failure_count.as_ref(),
        map.tolerated_failure_count_path.as_deref(),
        "ToleratedFailureCount",
    )?;
    let percentage = resolve_numeric_field(
        scope,
        map.tolerated_failure_percentage.as_ref(),
        map.tolerated_failure_percentage_path.as_deref(),
        "ToleratedFailurePercentage",
    )?;
    if count.is_some() && percentage.is_some() {
        return Err(EngineError::Syntax(
            "'ToleratedFailureCount' and 'ToleratedFailurePercentage' are mutually exclusive"
                .into(),
        ));
    }
    if let Some(n) = count {
        if n < 0.0 || n.fract() != 0.0 {
            return Err(EngineError::Syntax(
                "'ToleratedFailureCount' must be a non-negative integer".into(),
            ));
        }
        return Ok(n as usize);
    }
    if let Some(pct) = percentage {
        if !(0.0..=100.0).contains(&pct) {
            return Err(EngineError::Syntax(
                "'ToleratedFailurePercentage' must be between 0 and 100".into(),
            ));
        }
        return Ok((item_count as f64 * pct / 100.0).floor() as usize);
    }
    Ok(0)
}
