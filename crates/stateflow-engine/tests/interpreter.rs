//! End-to-end interpreter tests over full state machine documents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use stateflow_core::{
    EngineError, ResourceError, ResourceFn, RunOptions, StateMachine,
};
use stateflow_engine::Interpreter;

fn machine(doc: Value) -> StateMachine {
    serde_json::from_value(doc).unwrap()
}

/// Wraps a synchronous closure as an injectable resource.
fn resource<F>(f: F) -> ResourceFn
where
    F: Fn(Value) -> Result<Option<Value>, ResourceError> + Send + Sync + 'static,
{
    Arc::new(move |input| {
        let settled = f(input);
        Box::pin(async move { settled })
    })
}

#[tokio::test]
async fn test_pass_chain_terminates_with_input() {
    let m = machine(json!({
        "StartAt": "First",
        "States": {
            "First": { "Type": "Pass", "Next": "Last" },
            "Last": { "Type": "Succeed" }
        }
    }));
    let out = Interpreter::default().run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(out, json!({"a": 1}));
}

#[tokio::test]
async fn test_task_result_passes_through_unchanged() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": { "Type": "Task", "Resource": "arn:work", "End": true }
        }
    }));
    let options = RunOptions::new()
        .with_resource("arn:work", resource(|_| Ok(Some(json!({"b": 2})))));
    let out = Interpreter::new(options).run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(out, json!({"b": 2}));
}

#[tokio::test]
async fn test_result_path_null_keeps_original_input() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:work",
                "ResultPath": null,
                "End": true
            }
        }
    }));
    let options = RunOptions::new()
        .with_resource("arn:work", resource(|_| Ok(Some(json!({"b": 2})))));
    let out = Interpreter::new(options).run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(out, json!({"a": 1}));
}

#[tokio::test]
async fn test_output_path_null_yields_empty_object() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:work",
                "OutputPath": null,
                "End": true
            }
        }
    }));
    let options = RunOptions::new()
        .with_resource("arn:work", resource(|_| Ok(Some(json!({"b": 2})))));
    let out = Interpreter::new(options).run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(out, json!({}));
}

#[tokio::test]
async fn test_retry_exhaustion_invokes_one_plus_max_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let m = machine(json!({
        "StartAt": "Flaky",
        "States": {
            "Flaky": {
                "Type": "Task",
                "Resource": "arn:flaky",
                "Retry": [
                    { "ErrorEquals": ["States.ALL"], "MaxAttempts": 2, "IntervalSeconds": 0.0 }
                ],
                "End": true
            }
        }
    }));
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorded = attempts.clone();
    let mut options = RunOptions::new().with_resource(
        "arn:flaky",
        resource(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(ResourceError::task_failed("boom"))
        }),
    );
    options.on_retry = Some(Arc::new(move |advice| {
        recorded.lock().unwrap().push(advice.attempt);
        Box::pin(async {})
    }));

    let err = Interpreter::new(options).run(&m, json!({})).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*attempts.lock().unwrap(), vec![1, 2]);
    match err {
        EngineError::Execution { error, cause, state_stack } => {
            assert_eq!(error, "States.TaskFailed");
            assert_eq!(cause.as_deref(), Some("boom"));
            assert_eq!(state_stack, vec!["Flaky".to_string()]);
        }
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_catch_routes_error_output_to_recovery_state() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:doomed",
                "Catch": [
                    { "ErrorEquals": ["States.ALL"], "Next": "Recover", "ResultPath": "$.failure" }
                ],
                "End": true
            },
            "Recover": { "Type": "Pass", "End": true }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:doomed",
        resource(|_| Err(ResourceError::new("Custom.Oops", "went sideways"))),
    );
    let out = Interpreter::new(options).run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(
        out,
        json!({
            "a": 1,
            "failure": { "Error": "Custom.Oops", "Cause": "went sideways" }
        })
    );
}

#[tokio::test]
async fn test_parallel_partial_retry_round() {
    let doomed_calls = Arc::new(AtomicUsize::new(0));
    let steady_calls = Arc::new(AtomicUsize::new(0));
    let m = machine(json!({
        "StartAt": "Fan",
        "States": {
            "Fan": {
                "Type": "Parallel",
                "Retry": [
                    { "ErrorEquals": ["States.ALL"], "MaxAttempts": 1, "IntervalSeconds": 0.0 }
                ],
                "Branches": [
                    {
                        "StartAt": "Doomed",
                        "States": {
                            "Doomed": { "Type": "Task", "Resource": "arn:doomed", "End": true }
                        }
                    },
                    {
                        "StartAt": "Steady",
                        "States": {
                            "Steady": { "Type": "Task", "Resource": "arn:steady", "End": true }
                        }
                    }
                ],
                "End": true
            }
        }
    }));
    let d = doomed_calls.clone();
    let s = steady_calls.clone();
    let options = RunOptions::new()
        .with_resource(
            "arn:doomed",
            resource(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
                Err(ResourceError::task_failed("branch down"))
            }),
        )
        .with_resource(
            "arn:steady",
            resource(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!("fine")))
            }),
        );

    let err = Interpreter::new(options).run(&m, json!({})).await.unwrap_err();
    // One initial round plus one retry round for the failing branch only.
    assert_eq!(doomed_calls.load(Ordering::SeqCst), 2);
    assert_eq!(steady_calls.load(Ordering::SeqCst), 1);
    match err {
        EngineError::Execution { error, cause, .. } => {
            assert_eq!(error, "States.BranchFailed");
            assert_eq!(cause.as_deref(), Some("branch down"));
        }
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_wait_deadline_from_injected_clock() {
    let observed: Arc<Mutex<Option<(DateTime<Utc>, Option<f64>)>>> =
        Arc::new(Mutex::new(None));
    let sink = observed.clone();
    let m = machine(json!({
        "StartAt": "Hold",
        "States": {
            "Hold": { "Type": "Wait", "Seconds": 5, "End": true }
        }
    }));
    let fixed = DateTime::from_timestamp_millis(1_000_000).unwrap();
    let mut options = RunOptions::new();
    options.now_provider = Some(Arc::new(move || fixed));
    options.on_wait = Some(Arc::new(move |deadline, seconds| {
        *sink.lock().unwrap() = Some((deadline, seconds));
        Box::pin(async {})
    }));

    let out = Interpreter::new(options).run(&m, json!({"k": true})).await.unwrap();
    assert_eq!(out, json!({"k": true}));
    let (deadline, seconds) = observed.lock().unwrap().take().unwrap();
    assert_eq!(deadline.timestamp_millis(), 1_005_000);
    assert_eq!(seconds, Some(5.0));
}

#[tokio::test]
async fn test_choice_routes_on_first_matching_rule() {
    let m = machine(json!({
        "StartAt": "Route",
        "States": {
            "Route": {
                "Type": "Choice",
                "Choices": [
                    { "Variable": "$.n", "NumericGreaterThan": 10, "Next": "Big" },
                    { "Variable": "$.n", "NumericGreaterThan": 0, "Next": "Small" }
                ],
                "Default": "Neither"
            },
            "Big": { "Type": "Pass", "Result": "big", "End": true },
            "Small": { "Type": "Pass", "Result": "small", "End": true },
            "Neither": { "Type": "Pass", "Result": "neither", "End": true }
        }
    }));
    let engine = Interpreter::default();
    assert_eq!(engine.run(&m, json!({"n": 50})).await.unwrap(), json!("big"));
    assert_eq!(engine.run(&m, json!({"n": 3})).await.unwrap(), json!("small"));
    assert_eq!(engine.run(&m, json!({"n": -1})).await.unwrap(), json!("neither"));
}

#[tokio::test]
async fn test_choice_without_match_or_default_fails() {
    let m = machine(json!({
        "StartAt": "Route",
        "States": {
            "Route": {
                "Type": "Choice",
                "Choices": [
                    { "Variable": "$.n", "NumericEquals": 1, "Next": "Done" }
                ]
            },
            "Done": { "Type": "Succeed" }
        }
    }));
    let err = Interpreter::default().run(&m, json!({"n": 2})).await.unwrap_err();
    match err {
        EngineError::Execution { error, .. } => assert_eq!(error, "States.NoChoiceMatched"),
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_assign_variables_visible_downstream() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:count",
                "Assign": { "total.$": "$.count" },
                "Next": "Report"
            },
            "Report": {
                "Type": "Pass",
                "Parameters": { "seen.$": "$total" },
                "End": true
            }
        }
    }));
    let options = RunOptions::new()
        .with_resource("arn:count", resource(|_| Ok(Some(json!({"count": 12})))));
    let out = Interpreter::new(options).run(&m, json!({})).await.unwrap();
    assert_eq!(out, json!({"seen": 12}));
}

#[tokio::test]
async fn test_parameters_evaluate_dollar_string_values() {
    let m = machine(json!({
        "StartAt": "Shape",
        "States": {
            "Shape": {
                "Type": "Pass",
                "Parameters": { "copied": "$.a", "note": "kept" },
                "End": true
            }
        }
    }));
    let out = Interpreter::default().run(&m, json!({"a": 1})).await.unwrap();
    assert_eq!(out, json!({"copied": 1, "note": "kept"}));
}

#[tokio::test]
async fn test_rejected_credentials_short_circuit_the_resource() {
    let called = Arc::new(AtomicUsize::new(0));
    let c = called.clone();
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:guarded",
                "Credentials": { "RoleArn": "arn:role" },
                "End": true
            }
        }
    }));
    let mut options = RunOptions::new().with_resource(
        "arn:guarded",
        resource(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }),
    );
    options.on_credentials = Some(Arc::new(|_| false));
    let err = Interpreter::new(options).run(&m, json!({})).await.unwrap_err();
    assert_eq!(called.load(Ordering::SeqCst), 0);
    match err {
        EngineError::Execution { error, .. } => assert_eq!(error, "States.Permissions"),
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_accepted_credentials_reach_the_hook_evaluated() {
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:guarded",
                "Credentials": { "RoleArn.$": "$.role" },
                "End": true
            }
        }
    }));
    let mut options = RunOptions::new()
        .with_resource("arn:guarded", resource(|_| Ok(Some(json!("done")))));
    options.on_credentials = Some(Arc::new(move |creds| {
        *sink.lock().unwrap() = Some(creds.clone());
        true
    }));
    let out = Interpreter::new(options)
        .run(&m, json!({"role": "arn:role:prod"}))
        .await
        .unwrap();
    assert_eq!(out, json!("done"));
    assert_eq!(
        seen.lock().unwrap().take().unwrap(),
        json!({"RoleArn": "arn:role:prod"})
    );
}

#[tokio::test]
async fn test_heartbeat_refused_without_channel() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:slow",
                "HeartbeatSeconds": 10,
                "Catch": [
                    { "ErrorEquals": ["States.HeartbeatTimeout"], "Next": "Recover" }
                ],
                "End": true
            },
            "Recover": { "Type": "Pass", "End": true }
        }
    }));
    let called = Arc::new(AtomicUsize::new(0));
    let c = called.clone();
    let options = RunOptions::new().with_resource(
        "arn:slow",
        resource(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }),
    );
    let out = Interpreter::new(options).run(&m, json!({})).await.unwrap();
    // The resource is never invoked; the refusal short-circuits.
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert_eq!(out["Error"], json!("States.HeartbeatTimeout"));
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_becomes_typed_failure() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:stuck",
                "TaskTimeout": 5,
                "Catch": [
                    { "ErrorEquals": ["States.Timeout"], "Next": "Recover" }
                ],
                "End": true
            },
            "Recover": { "Type": "Pass", "End": true }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:stuck",
        Arc::new(|_| {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(Some(json!("too late")))
            })
        }),
    );
    let out = Interpreter::new(options).run(&m, json!({})).await.unwrap();
    assert_eq!(out["Error"], json!("States.Timeout"));
}

#[tokio::test]
async fn test_map_tolerated_failure_leaves_null_slot() {
    let m = machine(json!({
        "StartAt": "Each",
        "States": {
            "Each": {
                "Type": "Map",
                "ItemsPath": "$.items",
                "ToleratedFailureCount": 1,
                "ItemProcessor": {
                    "StartAt": "One",
                    "States": {
                        "One": { "Type": "Task", "Resource": "arn:item", "End": true }
                    }
                },
                "End": true
            }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:item",
        resource(|item| {
            if item == json!(2) {
                Err(ResourceError::task_failed("bad item"))
            } else {
                Ok(Some(json!({"ok": item})))
            }
        }),
    );
    let out = Interpreter::new(options)
        .run(&m, json!({"items": [1, 2, 3]}))
        .await
        .unwrap();
    assert_eq!(out, json!([{"ok": 1}, null, {"ok": 3}]));
}

#[tokio::test]
async fn test_map_failure_over_tolerance_fails_state() {
    let m = machine(json!({
        "StartAt": "Each",
        "States": {
            "Each": {
                "Type": "Map",
                "ItemProcessor": {
                    "StartAt": "One",
                    "States": {
                        "One": { "Type": "Task", "Resource": "arn:item", "End": true }
                    }
                },
                "End": true
            }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:item",
        resource(|item| {
            if item == json!(2) {
                Err(ResourceError::task_failed("bad item"))
            } else {
                Ok(Some(item))
            }
        }),
    );
    let err = Interpreter::new(options)
        .run(&m, json!([1, 2, 3]))
        .await
        .unwrap_err();
    match err {
        EngineError::Execution { error, .. } => {
            assert_eq!(error, "States.ExceedsToleratedFailureThreshold");
        }
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_map_sequential_when_max_concurrency_one() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    let m = machine(json!({
        "StartAt": "Each",
        "States": {
            "Each": {
                "Type": "Map",
                "MaxConcurrency": 1,
                "ItemProcessor": {
                    "StartAt": "One",
                    "States": {
                        "One": { "Type": "Task", "Resource": "arn:item", "End": true }
                    }
                },
                "End": true
            }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:item",
        resource(move |item| {
            sink.lock().unwrap().push(item.clone());
            Ok(Some(item))
        }),
    );
    let out = Interpreter::new(options)
        .run(&m, json!(["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(out, json!(["a", "b", "c"]));
    assert_eq!(*order.lock().unwrap(), vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn test_map_item_selector_sees_index_and_value() {
    let m = machine(json!({
        "StartAt": "Each",
        "States": {
            "Each": {
                "Type": "Map",
                "ItemSelector": {
                    "idx.$": "$$.Map.Item.Index",
                    "val.$": "$$.Map.Item.Value"
                },
                "ItemProcessor": {
                    "StartAt": "Echo",
                    "States": { "Echo": { "Type": "Pass", "End": true } }
                },
                "End": true
            }
        }
    }));
    let out = Interpreter::default().run(&m, json!([10, 20])).await.unwrap();
    assert_eq!(out, json!([{"idx": 0, "val": 10}, {"idx": 1, "val": 20}]));
}

#[tokio::test]
async fn test_fail_state_produces_terminal_error() {
    let m = machine(json!({
        "StartAt": "GiveUp",
        "States": {
            "GiveUp": {
                "Type": "Fail",
                "Error": "Order.Rejected",
                "Cause": "out of stock"
            }
        }
    }));
    let err = Interpreter::default().run(&m, json!({})).await.unwrap_err();
    match err {
        EngineError::Execution { error, cause, .. } => {
            assert_eq!(error, "Order.Rejected");
            assert_eq!(cause.as_deref(), Some("out of stock"));
        }
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_fail_state_error_path() {
    let m = machine(json!({
        "StartAt": "GiveUp",
        "States": {
            "GiveUp": { "Type": "Fail", "ErrorPath": "$.code", "CausePath": "$.why" }
        }
    }));
    let err = Interpreter::default()
        .run(&m, json!({"code": "Inventory.Empty", "why": "none left"}))
        .await
        .unwrap_err();
    match err {
        EngineError::Execution { error, cause, .. } => {
            assert_eq!(error, "Inventory.Empty");
            assert_eq!(cause.as_deref(), Some("none left"));
        }
        other => panic!("expected Execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_jsonata_arguments_and_output() {
    let m = machine(json!({
        "StartAt": "Work",
        "QueryLanguage": "JSONata",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:double",
                "Arguments": { "n": "{% $states.input.n * 2 %}" },
                "Output": { "final": "{% $states.input.result + 1 %}" },
                "End": true
            }
        }
    }));
    let options = RunOptions::new().with_resource(
        "arn:double",
        resource(|args| Ok(Some(json!({"result": args["n"]})))),
    );
    let out = Interpreter::new(options).run(&m, json!({"n": 5})).await.unwrap();
    assert_eq!(out, json!({"final": 11}));
}

#[tokio::test]
async fn test_jsonata_choice_condition() {
    let m = machine(json!({
        "StartAt": "Route",
        "QueryLanguage": "JSONata",
        "States": {
            "Route": {
                "Type": "Choice",
                "Choices": [
                    { "Condition": "{% $states.input.n > 10 %}", "Next": "Big" }
                ],
                "Default": "Small"
            },
            "Big": { "Type": "Succeed" },
            "Small": { "Type": "Fail", "Error": "Too.Small" }
        }
    }));
    let engine = Interpreter::default();
    assert!(engine.run(&m, json!({"n": 11})).await.is_ok());
    assert!(engine.run(&m, json!({"n": 9})).await.is_err());
}

#[tokio::test]
async fn test_language_gate_is_fatal_not_caught() {
    // 'Output' under JSONPath is a definition error; a States.ALL catcher
    // must not see it.
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:work",
                "Output": { "x": 1 },
                "Catch": [ { "ErrorEquals": ["States.ALL"], "Next": "Recover" } ],
                "End": true
            },
            "Recover": { "Type": "Pass", "End": true }
        }
    }));
    let options = RunOptions::new()
        .with_resource("arn:work", resource(|_| Ok(Some(json!(1)))));
    let err = Interpreter::new(options).run(&m, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Syntax(_)));
}

#[tokio::test]
async fn test_missing_resource_is_catchable() {
    let m = machine(json!({
        "StartAt": "Work",
        "States": {
            "Work": {
                "Type": "Task",
                "Resource": "arn:unregistered",
                "Catch": [ { "ErrorEquals": ["States.TaskFailed"], "Next": "Recover" } ],
                "End": true
            },
            "Recover": { "Type": "Pass", "Result": "recovered", "End": true }
        }
    }));
    let out = Interpreter::default().run(&m, json!({})).await.unwrap();
    assert_eq!(out, json!("recovered"));
}

#[tokio::test]
async fn test_invalid_machine_rejected_before_execution() {
    let m = machine(json!({
        "StartAt": "Gone",
        "States": { "A": { "Type": "Succeed" } }
    }));
    let err = Interpreter::default().run(&m, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Syntax(_)));
}

#[tokio::test]
async fn test_state_stack_tracks_parallel_branch() {
    let m = machine(json!({
        "StartAt": "Fan",
        "States": {
            "Fan": {
                "Type": "Parallel",
                "Branches": [
                    {
                        "StartAt": "Inner",
                        "States": {
                            "Inner": {
                                "Type": "Fail",
                                "Error": "Inner.Broke",
                                "Cause": "deep failure"
                            }
                        }
                    }
                ],
                "End": true
            }
        }
    }));
    let err = Interpreter::default().run(&m, json!({})).await.unwrap_err();
    match err {
        EngineError::Execution { error, cause, .. } => {
            assert_eq!(error, "States.BranchFailed");
            assert_eq!(cause.as_deref(), Some("deep failure"));
        }
        other => panic!("expected Execution error, got {other}"),
    }
}
