//! Map execution: resolve the item array, shape each item through
//! `ItemSelector` (with `$$.Map.Item.{Index,Value}` in scope), optionally
//! group items through `ItemBatcher`, then fan out over the item processor
//! with bounded concurrency and a tolerated-failure threshold.

use futures::StreamExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use stateflow_core::error::{EngineError, Result};
use stateflow_core::options::RunOptions;
use stateflow_core::types::{error_names, ErrorOutput, ItemBatcher, MapState, QueryLanguage};

use super::{StateContext, StateOutcome};
use crate::concurrency::{resolve_max_concurrency, resolve_tolerated_failures};
use crate::driver::run_machine;
use crate::expr::{resolve_numeric_field, EvalScope};

pub(super) async fn run(map: &MapState, ctx: &StateContext<'_>) -> Result<StateOutcome> {
    let scope = ctx.scope();
    let items = resolve_items(map, ctx)?;
    let item_count = items.len();

    let limit = resolve_max_concurrency(map, &scope)?;
    let tolerated = resolve_tolerated_failures(map, &scope, item_count)?;

    let mut inputs = Vec::with_capacity(item_count);
    for (index, item) in items.into_iter().enumerate() {
        inputs.push(select_item(map, ctx, index, item)?);
    }
    if let Some(batcher) = &map.item_batcher {
        inputs = batch_inputs(batcher, inputs, &scope, ctx.options)?;
    }

    debug!(
        state = %ctx.state_name,
        items = item_count,
        invocations = inputs.len(),
        max_concurrency = limit,
        "fanning out map items"
    );

    let width = if limit == 0 { inputs.len().max(1) } else { limit };
    let runs = inputs.into_iter().enumerate().map(|(i, input)| {
        let mut stack = ctx.state_stack.to_vec();
        stack.push(format!("{}[{}]", ctx.state_name, i));
        run_machine(
            &map.item_processor,
            input,
            ctx.options,
            ctx.evaluator,
            ctx.variables.clone(),
            stack,
        )
    });
    let settled: Vec<Result<Value>> = futures::stream::iter(runs)
        .buffered(width)
        .collect()
        .await;

    let mut results = Vec::with_capacity(settled.len());
    let mut causes = Vec::new();
    for outcome in settled {
        match outcome {
            Ok(output) => results.push(output),
            Err(e) => {
                let Some(error) = e.error_output() else {
                    return Err(e);
                };
                results.push(Value::Null);
                causes.push(error.cause.unwrap_or(error.error));
            }
        }
    }

    if causes.len() > tolerated {
        return Ok(StateOutcome::failure(ErrorOutput::with_cause(
            error_names::EXCEEDS_TOLERATED_FAILURE_THRESHOLD,
            format!(
                "{} of {} invocations failed: {}",
                causes.len(),
                results.len(),
                causes.join("; ")
            ),
        )));
    }
    Ok(StateOutcome::success(Value::Array(results)))
}

/// `Items` is the JSONata form, `ItemsPath` the JSONPath form; absent both,
/// the effective input itself must be the array.
fn resolve_items(map: &MapState, ctx: &StateContext<'_>) -> Result<Vec<Value>> {
    let scope = ctx.scope();
    let resolved = match ctx.language {
        QueryLanguage::Jsonata => {
            if map.items_path.is_some() {
                return Err(EngineError::Syntax(
                    "'ItemsPath' requires the JSONPath query language".into(),
                ));
            }
            match &map.items {
                Some(template) => scope.evaluate(template)?,
                None => ctx.input.clone(),
            }
        }
        QueryLanguage::JsonPath => {
            if map.items.is_some() {
                return Err(EngineError::Syntax(
                    "'Items' requires the JSONata query language".into(),
                ));
            }
            match &map.items_path {
                Some(p) => scope.evaluate_path(p)?,
                None => ctx.input.clone(),
            }
        }
    };
    match resolved {
        Value::Array(items) => Ok(items),
        other => Err(EngineError::Expression(format!(
            "Map items must be an array, got {}",
            type_name(&other)
        ))),
    }
}

fn select_item(
    map: &MapState,
    ctx: &StateContext<'_>,
    index: usize,
    item: Value,
) -> Result<Value> {
    let Some(selector) = &map.item_selector else {
        return Ok(item);
    };
    let mut item_context = ctx.context_value.clone();
    if let Value::Object(obj) = &mut item_context {
        obj.insert(
            "Map".into(),
            json!({ "Item": { "Index": index, "Value": item } }),
        );
    }
    let scope = EvalScope {
        input: ctx.input,
        context: &item_context,
        variables: ctx.variables,
        language: ctx.language,
        evaluator: ctx.evaluator,
    };
    scope.evaluate(selector)
}

/// Greedy batching: a batch closes when it reaches `MaxItemsPerBatch` items
/// or adding the next item would push it past `MaxInputBytesPerBatch`.
fn batch_inputs(
    batcher: &ItemBatcher,
    items: Vec<Value>,
    scope: &EvalScope<'_>,
    options: &RunOptions,
) -> Result<Vec<Value>> {
    let max_items = resolve_numeric_field(
        scope,
        batcher.max_items_per_batch.as_ref(),
        batcher.max_items_per_batch_path.as_deref(),
        "MaxItemsPerBatch",
    )?
    .map(|n| positive_int(n, "MaxItemsPerBatch"))
    .transpose()?;
    let max_bytes = resolve_numeric_field(
        scope,
        batcher.max_input_bytes_per_batch.as_ref(),
        batcher.max_input_bytes_per_batch_path.as_deref(),
        "MaxInputBytesPerBatch",
    )?
    .map(|n| positive_int(n, "MaxInputBytesPerBatch"))
    .transpose()?;

    if let Some(bytes) = max_bytes {
        let accepted = match &options.on_max_input_bytes_per_batch {
            Some(hook) => hook(bytes as u64),
            None => true,
        };
        if !accepted {
            return Err(EngineError::Syntax(format!(
                "'MaxInputBytesPerBatch' of {} was rejected",
                bytes
            )));
        }
    }

    let batch_input = match &batcher.batch_input {
        Some(template) => match scope.evaluate(template)? {
            Value::Object(obj) => obj,
            _ => {
                return Err(EngineError::Syntax(
                    "'BatchInput' must evaluate to an object".into(),
                ))
            }
        },
        None => Map::new(),
    };

    let mut batches = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut current_bytes = 0usize;
    for item in items {
        let item_bytes = item.to_string().len();
        let full_by_count = max_items.is_some_and(|n| current.len() >= n);
        let full_by_bytes =
            max_bytes.is_some_and(|n| !current.is_empty() && current_bytes + item_bytes > n);
        if full_by_count || full_by_bytes {
            batches.push(close_batch(&batch_input, std::mem::take(&mut current)));
            current_bytes = 0;
        }
        current_bytes += item_bytes;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(close_batch(&batch_input, current));
    }
    Ok(batches)
}

fn close_batch(batch_input: &Map<String, Value>, items: Vec<Value>) -> Value {
    let mut obj = batch_input.clone();
    obj.insert("Items".into(), Value::Array(items));
    Value::Object(obj)
}

fn positive_int(n: f64, field: &str) -> Result<usize> {
    if n >= 1.0 && n.fract() == 0.0 {
        Ok(n as usize)
    } else {
        Err(EngineError::Syntax(format!(
            "'{}' must be a positive integer",
            field
        )))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DefaultEvaluator;
    use std::sync::Arc;
    use stateflow_core::types::QueryLanguage;

    fn batcher(doc: Value) -> ItemBatcher {
        serde_json::from_value(doc).unwrap()
    }

    fn scope<'a>(input: &'a Value, vars: &'a Map<String, Value>) -> EvalScope<'a> {
        EvalScope {
            input,
            context: &Value::Null,
            variables: vars,
            language: QueryLanguage::JsonPath,
            evaluator: &DefaultEvaluator,
        }
    }

    #[test]
    fn test_batch_by_count() {
        let b = batcher(json!({ "MaxItemsPerBatch": 2 }));
        let items = vec![json!(1), json!(2), json!(3), json!(4), json!(5)];
        let input = json!({});
        let vars = Map::new();
        let got = batch_inputs(&b, items, &scope(&input, &vars), &RunOptions::new()).unwrap();
        assert_eq!(
            got,
            vec![
                json!({"Items": [1, 2]}),
                json!({"Items": [3, 4]}),
                json!({"Items": [5]}),
            ]
        );
    }

    #[test]
    fn test_batch_by_bytes() {
        // Each item serializes to 10 bytes; 25 fits two per batch.
        let b = batcher(json!({ "MaxInputBytesPerBatch": 25 }));
        let items = vec![json!("xxxxxxxx"); 3];
        let input = json!({});
        let vars = Map::new();
        let got = batch_inputs(&b, items, &scope(&input, &vars), &RunOptions::new()).unwrap();
        assert_eq!(
            got,
            vec![
                json!({"Items": ["xxxxxxxx", "xxxxxxxx"]}),
                json!({"Items": ["xxxxxxxx"]}),
            ]
        );
    }

    #[test]
    fn test_batch_input_merged_into_every_batch() {
        let b = batcher(json!({
            "MaxItemsPerBatch": 2,
            "BatchInput": { "job": "sync" }
        }));
        let items = vec![json!(1), json!(2), json!(3)];
        let input = json!({});
        let vars = Map::new();
        let got = batch_inputs(&b, items, &scope(&input, &vars), &RunOptions::new()).unwrap();
        assert_eq!(
            got,
            vec![
                json!({"job": "sync", "Items": [1, 2]}),
                json!({"job": "sync", "Items": [3]}),
            ]
        );
    }

    #[test]
    fn test_no_limits_yield_single_batch() {
        let b = batcher(json!({ "BatchInput": { "job": "sync" } }));
        let items = vec![json!(1), json!(2)];
        let input = json!({});
        let vars = Map::new();
        let got = batch_inputs(&b, items, &scope(&input, &vars), &RunOptions::new()).unwrap();
        assert_eq!(got, vec![json!({"job": "sync", "Items": [1, 2]})]);
    }

    #[test]
    fn test_rejected_byte_limit_fails() {
        let b = batcher(json!({ "MaxInputBytesPerBatch": 100 }));
        let mut options = RunOptions::new();
        options.on_max_input_bytes_per_batch = Some(Arc::new(|_| false));
        let input = json!({});
        let vars = Map::new();
        let err =
            batch_inputs(&b, vec![json!(1)], &scope(&input, &vars), &options).unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
    }
}
