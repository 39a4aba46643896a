//! Structural validation of a parsed state machine.
//!
//! Only what execution requires is checked: every transition target must
//! resolve to an existing state, and every non-terminal state must declare
//! exactly one of `Next` or `End`. Validation recurses into Parallel
//! branches and Map item processors, which are state machines of their own.

use crate::error::{EngineError, Result};
use crate::types::{ChoiceRule, State, StateMachine};

impl StateMachine {
    pub fn validate(&self) -> Result<()> {
        self.validate_at("")
    }

    fn validate_at(&self, scope: &str) -> Result<()> {
        if !self.states.contains_key(&self.start_at) {
            return Err(EngineError::Syntax(format!(
                "{}StartAt '{}' does not name a state",
                scope,
                self.start_at
            )));
        }

        for (name, state) in &self.states {
            let common = state.common();

            match state {
                State::Choice(choice) => {
                    if common.next.is_some() || common.end {
                        return Err(EngineError::Syntax(format!(
                            "{}Choice state '{}' must not have Next or End",
                            scope,
                            name
                        )));
                    }
                    for rule in &choice.choices {
                        let next = rule.next.as_deref().ok_or_else(|| {
                            EngineError::Syntax(format!(
                                "{}Choice state '{}' has a top-level rule without Next",
                                scope,
                                name
                            ))
                        })?;
                        self.check_target(scope, name, next)?;
                        check_rule_shape(scope, name, rule)?;
                    }
                    if let Some(default) = &choice.default {
                        self.check_target(scope, name, default)?;
                    }
                }
                State::Succeed(_) | State::Fail(_) => {
                    if common.next.is_some() {
                        return Err(EngineError::Syntax(format!(
                            "{}{} state '{}' must not have Next",
                            scope,
                            state.kind(),
                            name
                        )));
                    }
                }
                _ => {
                    if common.next.is_some() == common.end {
                        return Err(EngineError::Syntax(format!(
                            "{}State '{}' must have exactly one of Next or End",
                            scope,
                            name
                        )));
                    }
                }
            }

            if let Some(next) = &common.next {
                self.check_target(scope, name, next)?;
            }
            for catcher in &common.catch {
                self.check_target(scope, name, &catcher.next)?;
            }

            match state {
                State::Parallel(parallel) => {
                    for (i, branch) in parallel.branches.iter().enumerate() {
                        branch.validate_at(&format!("{}{}[{}]: ", scope, name, i))?;
                    }
                }
                State::Map(map) => {
                    map.item_processor
                        .validate_at(&format!("{}{}: ", scope, name))?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn check_target(&self, scope: &str, from: &str, target: &str) -> Result<()> {
        if !self.states.contains_key(target) {
            return Err(EngineError::Syntax(format!(
                "{}State '{}' transitions to unknown state '{}'",
                scope,
                from,
                target
            )));
        }
        Ok(())
    }
}

/// A rule must be a combinator, a JSONata condition, or a Variable plus a
/// comparison. Operator arity (exactly one comparison) is left to the
/// Choice executor, which knows the active query language.
fn check_rule_shape(scope: &str, state: &str, rule: &ChoiceRule) -> Result<()> {
    let is_combinator = !rule.and.is_empty() || !rule.or.is_empty() || rule.not.is_some();
    if !is_combinator && rule.condition.is_none() && rule.variable.is_none() {
        return Err(EngineError::Syntax(format!(
            "{}Choice state '{}' has a rule with no Condition, Variable, or combinator",
            scope,
            state
        )));
    }
    Ok(())
}
