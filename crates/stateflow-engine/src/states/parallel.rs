//! Parallel execution with round-based settlement.
//!
//! All pending branches of a round are awaited together; only then are
//! failures weighed against the state's Retry policy, using a per-branch
//! attempt counter. A retried branch stays pending for the next round, so a
//! sibling's retry never blocks a still-succeeding branch, and the
//! interpreter never fails fast mid-round. Because the Retry budget is
//! spent here, the aggregate failure is marked retry-consumed and the
//! driver routes it straight to Catch.

use futures::future::join_all;
use tracing::warn;

use stateflow_core::error::Result;
use stateflow_core::options::RetryAdvice;
use stateflow_core::types::{error_names, ErrorOutput, ParallelState};

use serde_json::Value;

use super::{evaluate_args, StateContext, StateOutcome};
use crate::driver::run_machine;
use crate::retry::{backoff_delay, find_retrier};

pub(super) async fn run(
    parallel: &ParallelState,
    ctx: &StateContext<'_>,
) -> Result<StateOutcome> {
    let args = evaluate_args(&parallel.common, ctx)?;
    let branch_count = parallel.branches.len();
    let mut results: Vec<Value> = vec![Value::Null; branch_count];
    let mut attempts: Vec<u32> = vec![0; branch_count];
    let mut pending: Vec<usize> = (0..branch_count).collect();

    loop {
        let round = pending.iter().map(|&i| {
            let mut stack = ctx.state_stack.to_vec();
            stack.push(branch_label(ctx.state_name, i));
            run_machine(
                &parallel.branches[i],
                args.clone(),
                ctx.options,
                ctx.evaluator,
                ctx.variables.clone(),
                stack,
            )
        });
        let settled = join_all(round).await;

        let mut next_round = Vec::new();
        let mut causes = Vec::new();
        for (&i, outcome) in pending.iter().zip(settled) {
            match outcome {
                Ok(output) => results[i] = output,
                Err(e) => {
                    let Some(error) = e.error_output() else {
                        return Err(e);
                    };
                    if let Some((_, retrier)) =
                        find_retrier(&parallel.common.retry, &error.error)
                    {
                        if attempts[i] < retrier.attempts() {
                            attempts[i] += 1;
                            let delay = backoff_delay(retrier, attempts[i]);
                            warn!(
                                branch = %branch_label(ctx.state_name, i),
                                error = %error.error,
                                attempt = attempts[i],
                                "retrying branch"
                            );
                            if let Some(hook) = &ctx.options.on_retry {
                                hook(RetryAdvice {
                                    state_name: branch_label(ctx.state_name, i),
                                    error: error.clone(),
                                    attempt: attempts[i],
                                    delay_seconds: delay,
                                })
                                .await;
                            }
                            next_round.push(i);
                            continue;
                        }
                    }
                    results[i] = Value::Null;
                    causes.push(error.cause.unwrap_or(error.error));
                }
            }
        }

        if !causes.is_empty() {
            return Ok(StateOutcome::failure(ErrorOutput::with_cause(
                error_names::BRANCH_FAILED,
                causes.join("; "),
            ))
            .consumed_retry());
        }
        if next_round.is_empty() {
            return Ok(StateOutcome::success(Value::Array(results)));
        }
        pending = next_round;
    }
}

fn branch_label(state_name: &str, index: usize) -> String {
    format!("{}[{}]", state_name, index)
}
