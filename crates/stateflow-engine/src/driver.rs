//! The state machine driver: a trampoline that walks states from `StartAt`,
//! hands each to its executor, routes failures through Retry/Catch, runs
//! the output pipeline, and follows `Next` until a terminal state.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use stateflow_core::error::{EngineError, Result};
use stateflow_core::options::{RetryAdvice, RunOptions};
use stateflow_core::traits::QueryEvaluator;
use stateflow_core::types::{QueryLanguage, State, StateMachine};

use crate::expr::{DefaultEvaluator, EvalScope};
use crate::output::{evaluate_output, OutputSource};
use crate::retry::{backoff_delay, find_catcher, find_retrier};
use crate::states::{run_state, StateContext, StateOutcome};

/// Executes state machines against a fixed set of run options. Cheap to
/// clone; one interpreter can serve many concurrent runs of many machines.
#[derive(Clone)]
pub struct Interpreter {
    options: Arc<RunOptions>,
    evaluator: Arc<dyn QueryEvaluator>,
}

impl Interpreter {
    pub fn new(options: RunOptions) -> Self {
        let evaluator: Arc<dyn QueryEvaluator> = match options.evaluator.clone() {
            Some(custom) => custom,
            None => Arc::new(DefaultEvaluator),
        };
        Self {
            options: Arc::new(options),
            evaluator,
        }
    }

    /// Validates the machine, then runs it to a terminal output.
    pub async fn run(&self, machine: &StateMachine, input: Value) -> Result<Value> {
        machine.validate()?;
        info!(start_at = %machine.start_at, "starting state machine run");
        run_machine(
            machine,
            input,
            &self.options,
            self.evaluator.as_ref(),
            Map::new(),
            Vec::new(),
        )
        .await
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(RunOptions::new())
    }
}

/// One state machine invocation. Boxed so Parallel branches and Map item
/// processors can recurse through it.
pub(crate) fn run_machine<'a>(
    machine: &'a StateMachine,
    input: Value,
    options: &'a RunOptions,
    evaluator: &'a dyn QueryEvaluator,
    variables: Map<String, Value>,
    state_stack: Vec<String>,
) -> BoxFuture<'a, Result<Value>> {
    Box::pin(drive(machine, input, options, evaluator, variables, state_stack))
}

async fn drive(
    machine: &StateMachine,
    mut input: Value,
    options: &RunOptions,
    evaluator: &dyn QueryEvaluator,
    mut variables: Map<String, Value>,
    mut state_stack: Vec<String>,
) -> Result<Value> {
    let mut current = machine.start_at.clone();
    // Per-retrier attempt counters for the state being (re-)executed.
    let mut retry_counts: Vec<u32> = Vec::new();
    let mut total_retries: u32 = 0;

    loop {
        let state = machine
            .state(&current)
            .ok_or_else(|| EngineError::StateNotFound(current.clone()))?;
        let common = state.common();
        let language = common
            .query_language
            .or(options.language)
            .or(machine.query_language)
            .unwrap_or_default();
        if retry_counts.len() != common.retry.len() {
            retry_counts = vec![0; common.retry.len()];
        }

        debug!(state = %current, kind = state.kind(), "executing state");
        let context_value = build_context(options, &current, total_retries);

        let attempt: Result<StateOutcome> = attempt_state(
            state,
            &current,
            language,
            &input,
            &context_value,
            options,
            evaluator,
            &mut variables,
            &state_stack,
        )
        .await;

        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(e) => match e.error_output() {
                Some(error) if !e.is_fatal() => StateOutcome::failure(error),
                _ => return Err(e),
            },
        };

        if let Some(error) = outcome.error_output {
            if !outcome.retry_consumed {
                if let Some((idx, retrier)) = find_retrier(&common.retry, &error.error) {
                    if retry_counts[idx] < retrier.attempts() {
                        retry_counts[idx] += 1;
                        total_retries += 1;
                        let delay = backoff_delay(retrier, retry_counts[idx]);
                        warn!(
                            state = %current,
                            error = %error.error,
                            attempt = retry_counts[idx],
                            delay_seconds = delay,
                            "retrying state"
                        );
                        if let Some(hook) = &options.on_retry {
                            hook(RetryAdvice {
                                state_name: current.clone(),
                                error: error.clone(),
                                attempt: retry_counts[idx],
                                delay_seconds: delay,
                            })
                            .await;
                        }
                        continue;
                    }
                }
            }
            if let Some(catcher) = find_catcher(&common.catch, &error.error) {
                debug!(state = %current, error = %error.error, next = %catcher.next, "catching error");
                // A failure inside a catch pipeline propagates; there is no
                // recursive catching.
                let routed = evaluate_output(
                    &OutputSource::from_catcher(catcher),
                    &input,
                    error.to_value(),
                    &context_value,
                    language,
                    evaluator,
                    &mut variables,
                )?;
                if let Some(hook) = &options.on_state_complete {
                    hook(&current, &routed);
                }
                input = routed;
                current = catcher.next.clone();
                retry_counts.clear();
                total_retries = 0;
                continue;
            }
            state_stack.push(current);
            return Err(EngineError::from_error_output(error, state_stack));
        }

        let output = outcome.output;
        if let Some(hook) = &options.on_state_complete {
            hook(&current, &output);
        }
        input = output;

        match outcome.next_override.or_else(|| common.next.clone()) {
            Some(next) => {
                current = next;
                retry_counts.clear();
                total_retries = 0;
            }
            None => {
                if common.end || state.is_terminal_kind() {
                    return Ok(input);
                }
                return Err(EngineError::Syntax(format!(
                    "State '{}' has no 'Next' and is not terminal",
                    current
                )));
            }
        }
    }
}

/// One attempt at one state: InputPath, the executor, and (on success) the
/// output pipeline. Catchable errors from any of these route identically.
#[allow(clippy::too_many_arguments)]
async fn attempt_state(
    state: &State,
    state_name: &str,
    language: QueryLanguage,
    raw_input: &Value,
    context_value: &Value,
    options: &RunOptions,
    evaluator: &dyn QueryEvaluator,
    variables: &mut Map<String, Value>,
    state_stack: &[String],
) -> Result<StateOutcome> {
    let effective_input = effective_input(
        state.common().input_path.as_ref(),
        language,
        raw_input,
        context_value,
        variables,
        evaluator,
    )?;

    let ctx = StateContext {
        state_name,
        language,
        options,
        evaluator,
        context_value,
        variables,
        input: &effective_input,
        state_stack,
    };
    let mut outcome = run_state(state, &ctx).await?;

    if outcome.error_output.is_none() {
        let result = std::mem::replace(&mut outcome.output, Value::Null);
        outcome.output = evaluate_output(
            &OutputSource::from_common(state.common()),
            raw_input,
            result,
            context_value,
            language,
            evaluator,
            variables,
        )?;
    }
    Ok(outcome)
}

fn effective_input(
    input_path: Option<&Option<String>>,
    language: QueryLanguage,
    raw_input: &Value,
    context_value: &Value,
    variables: &Map<String, Value>,
    evaluator: &dyn QueryEvaluator,
) -> Result<Value> {
    match input_path {
        None => Ok(raw_input.clone()),
        Some(_) if language == QueryLanguage::Jsonata => Err(EngineError::Syntax(
            "'InputPath' requires the JSONPath query language".into(),
        )),
        Some(None) => Ok(Value::Object(Map::new())),
        Some(Some(p)) => {
            let scope = EvalScope {
                input: raw_input,
                context: context_value,
                variables,
                language,
                evaluator,
            };
            scope.evaluate_path(p)
        }
    }
}

/// The caller's context object extended with the driver-maintained `State`
/// block. Rebuilt per transition; expressions see it as `$$`.
fn build_context(options: &RunOptions, state_name: &str, retry_count: u32) -> Value {
    let mut context = options.context_object.clone().unwrap_or_else(|| json!({}));
    if let Value::Object(obj) = &mut context {
        obj.insert(
            "State".into(),
            json!({ "Name": state_name, "RetryCount": retry_count }),
        );
    }
    context
}
