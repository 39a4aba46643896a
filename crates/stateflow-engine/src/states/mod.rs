//! One execution strategy per state kind, all sharing the same contract:
//! take the per-transition [`StateContext`], produce a [`StateOutcome`].
//! Executors never consult Retry/Catch themselves; failures come back as
//! `ErrorOutput`s for the driver to route.

mod choice;
mod fail;
mod map;
mod parallel;
mod pass;
mod succeed;
mod task;
mod wait;

use serde_json::{Map, Value};

use stateflow_core::error::{EngineError, Result};
use stateflow_core::options::RunOptions;
use stateflow_core::traits::QueryEvaluator;
use stateflow_core::types::{CommonFields, ErrorOutput, QueryLanguage, State};

use crate::expr::EvalScope;

/// Everything a single state invocation can see. Rebuilt by the driver on
/// every transition; never shared across branches.
pub(crate) struct StateContext<'a> {
    pub state_name: &'a str,
    pub language: QueryLanguage,
    pub options: &'a RunOptions,
    pub evaluator: &'a dyn QueryEvaluator,
    /// Context object for `$$` / `$states.context`, including the
    /// driver-maintained `State` block.
    pub context_value: &'a Value,
    pub variables: &'a Map<String, Value>,
    /// State input after `InputPath`.
    pub input: &'a Value,
    /// Lineage of enclosing states, for diagnostics and branch labels.
    pub state_stack: &'a [String],
}

impl<'a> StateContext<'a> {
    pub fn scope(&self) -> EvalScope<'a> {
        EvalScope {
            input: self.input,
            context: self.context_value,
            variables: self.variables,
            language: self.language,
            evaluator: self.evaluator,
        }
    }
}

/// What a state executor hands back to the driver.
pub(crate) struct StateOutcome {
    pub output: Value,
    pub error_output: Option<ErrorOutput>,
    /// Transition target chosen by the state itself (Choice rules).
    pub next_override: Option<String>,
    /// Set when the state already spent its own Retry budget internally
    /// (Parallel branch rounds); the driver then skips straight to Catch.
    pub retry_consumed: bool,
}

impl StateOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            output,
            error_output: None,
            next_override: None,
            retry_consumed: false,
        }
    }

    pub fn failure(error: ErrorOutput) -> Self {
        Self {
            output: Value::Null,
            error_output: Some(error),
            next_override: None,
            retry_consumed: false,
        }
    }

    pub fn with_next(mut self, next: String) -> Self {
        self.next_override = Some(next);
        self
    }

    pub fn consumed_retry(mut self) -> Self {
        self.retry_consumed = true;
        self
    }
}

pub(crate) async fn run_state(state: &State, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    match state {
        State::Task(s) => task::run(s, ctx).await,
        State::Parallel(s) => parallel::run(s, ctx).await,
        State::Map(s) => map::run(s, ctx).await,
        State::Wait(s) => wait::run(s, ctx).await,
        State::Pass(s) => pass::run(s, ctx),
        State::Choice(s) => choice::run(s, ctx),
        State::Succeed(s) => succeed::run(s, ctx),
        State::Fail(s) => fail::run(s, ctx),
    }
}

/// Evaluates the state's argument template (`Parameters` under JSONPath,
/// `Arguments` under JSONata), defaulting to the effective input.
pub(super) fn evaluate_args(common: &CommonFields, ctx: &StateContext<'_>) -> Result<Value> {
    match ctx.language {
        QueryLanguage::JsonPath => {
            if common.arguments.is_some() {
                return Err(EngineError::Syntax(
                    "'Arguments' requires the JSONata query language".into(),
                ));
            }
            match &common.parameters {
                Some(template) => ctx.scope().evaluate(template),
                None => Ok(ctx.input.clone()),
            }
        }
        QueryLanguage::Jsonata => {
            if common.parameters.is_some() {
                return Err(EngineError::Syntax(
                    "'Parameters' requires the JSONPath query language".into(),
                ));
            }
            match &common.arguments {
                Some(template) => ctx.scope().evaluate(template),
                None => Ok(ctx.input.clone()),
            }
        }
    }
}
