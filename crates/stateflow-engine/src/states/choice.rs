//! Choice execution: scan the rules in order and pick the first match as
//! the transition override. No rule and no `Default` fails the state with
//! `States.NoChoiceMatched`.

use serde_json::Value;

use stateflow_core::error::{EngineError, Result};
use stateflow_core::types::{error_names, ChoiceRule, ChoiceState, ErrorOutput, QueryLanguage};

use super::{StateContext, StateOutcome};
use crate::expr::{functional_body, EvalScope};

pub(super) fn run(choice: &ChoiceState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    let scope = ctx.scope();
    for rule in &choice.choices {
        if matches_rule(rule, &scope, ctx.language)? {
            let next = rule.next.clone().ok_or_else(|| {
                EngineError::Syntax("matched Choice rule has no 'Next'".into())
            })?;
            return Ok(StateOutcome::success(ctx.input.clone()).with_next(next));
        }
    }
    if let Some(default) = &choice.default {
        return Ok(StateOutcome::success(ctx.input.clone()).with_next(default.clone()));
    }
    Ok(StateOutcome::failure(ErrorOutput::with_cause(
        error_names::NO_CHOICE_MATCHED,
        "no Choice rule matched and no Default is declared",
    )))
}

fn matches_rule(rule: &ChoiceRule, scope: &EvalScope<'_>, language: QueryLanguage) -> Result<bool> {
    match language {
        QueryLanguage::Jsonata => {
            let condition = rule.condition.as_deref().ok_or_else(|| {
                EngineError::Syntax("JSONata Choice rules require 'Condition'".into())
            })?;
            let body = functional_body(condition).unwrap_or(condition);
            match scope.evaluate_functional(body)? {
                Value::Bool(b) => Ok(b),
                _ => Err(EngineError::Expression(
                    "Choice 'Condition' must evaluate to a boolean".into(),
                )),
            }
        }
        QueryLanguage::JsonPath => eval_data_rule(rule, scope),
    }
}

fn eval_data_rule(rule: &ChoiceRule, scope: &EvalScope<'_>) -> Result<bool> {
    if !rule.and.is_empty() {
        for inner in &rule.and {
            if !eval_data_rule(inner, scope)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if !rule.or.is_empty() {
        for inner in &rule.or {
            if eval_data_rule(inner, scope)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    if let Some(inner) = &rule.not {
        return Ok(!eval_data_rule(inner, scope)?);
    }

    let variable = rule.variable.as_deref().ok_or_else(|| {
        EngineError::Syntax("Choice rule requires 'Variable' or a combinator".into())
    })?;
    let value = scope.query_opt(variable)?;
    let comparison = comparison_of(rule)?;

    if let Comparison::IsPresent(expected) = &comparison {
        return Ok(value.is_some() == *expected);
    }
    // Any other comparison against a missing value is simply no match.
    let Some(value) = value else {
        return Ok(false);
    };

    Ok(match comparison {
        Comparison::IsPresent(_) => unreachable!("handled above"),
        Comparison::IsNull(expected) => value.is_null() == expected,
        Comparison::BooleanEquals(expected) => value.as_bool() == Some(expected),
        Comparison::StringEquals(s) => value.as_str() == Some(s.as_str()),
        Comparison::StringLessThan(s) => value.as_str().is_some_and(|v| v < s.as_str()),
        Comparison::StringGreaterThan(s) => value.as_str().is_some_and(|v| v > s.as_str()),
        Comparison::StringLessThanEquals(s) => value.as_str().is_some_and(|v| v <= s.as_str()),
        Comparison::StringGreaterThanEquals(s) => {
            value.as_str().is_some_and(|v| v >= s.as_str())
        }
        Comparison::NumericEquals(n) => value.as_f64() == Some(n),
        Comparison::NumericLessThan(n) => value.as_f64().is_some_and(|v| v < n),
        Comparison::NumericGreaterThan(n) => value.as_f64().is_some_and(|v| v > n),
        Comparison::NumericLessThanEquals(n) => value.as_f64().is_some_and(|v| v <= n),
        Comparison::NumericGreaterThanEquals(n) => value.as_f64().is_some_and(|v| v >= n),
    })
}

enum Comparison<'a> {
    StringEquals(&'a String),
    StringLessThan(&'a String),
    StringGreaterThan(&'a String),
    StringLessThanEquals(&'a String),
    StringGreaterThanEquals(&'a String),
    NumericEquals(f64),
    NumericLessThan(f64),
    NumericGreaterThan(f64),
    NumericLessThanEquals(f64),
    NumericGreaterThanEquals(f64),
    BooleanEquals(bool),
    IsPresent(bool),
    IsNull(bool),
}

/// Exactly one comparison operator must accompany `Variable`.
fn comparison_of(rule: &ChoiceRule) -> Result<Comparison<'_>> {
    let mut found: Vec<Comparison<'_>> = Vec::new();
    if let Some(v) = &rule.string_equals {
        found.push(Comparison::StringEquals(v));
    }
    if let Some(v) = &rule.string_less_than {
        found.push(Comparison::StringLessThan(v));
    }
    if let Some(v) = &rule.string_greater_than {
        found.push(Comparison::StringGreaterThan(v));
    }
    if let Some(v) = &rule.string_less_than_equals {
        found.push(Comparison::StringLessThanEquals(v));
    }
    if let Some(v) = &rule.string_greater_than_equals {
        found.push(Comparison::StringGreaterThanEquals(v));
    }
    if let Some(v) = rule.numeric_equals {
        found.push(Comparison::NumericEquals(v));
    }
    if let Some(v) = rule.numeric_less_than {
        found.push(Comparison::NumericLessThan(v));
    }
    if let Some(v) = rule.numeric_greater_than {
        found.push(Comparison::NumericGreaterThan(v));
    }
    if let Some(v) = rule.numeric_less_than_equals {
        found.push(Comparison::NumericLessThanEquals(v));
    }
    if let Some(v) = rule.numeric_greater_than_equals {
        found.push(Comparison::NumericGreaterThanEquals(v));
    }
    if let Some(v) = rule.boolean_equals {
        found.push(Comparison::BooleanEquals(v));
    }
    if let Some(v) = rule.is_present {
        found.push(Comparison::IsPresent(v));
    }
    if let Some(v) = rule.is_null {
        found.push(Comparison::IsNull(v));
    }
    let mut found = found.into_iter();
    match (found.next(), found.next()) {
        (Some(comparison), None) => Ok(comparison),
        (None, _) => Err(EngineError::Syntax(
            "Choice rule with 'Variable' requires a comparison operator".into(),
        )),
        _ => Err(EngineError::Syntax(
            "Choice rule must carry exactly one comparison operator".into(),
        )),
    }
}
