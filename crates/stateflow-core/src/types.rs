use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Reserved error names of the `States.*` namespace.
pub mod error_names {
    /// Wildcard matching any error in `ErrorEquals`.
    pub const ALL: &str = "States.ALL";
    pub const TASK_FAILED: &str = "States.TaskFailed";
    pub const TIMEOUT: &str = "States.Timeout";
    pub const HEARTBEAT_TIMEOUT: &str = "States.HeartbeatTimeout";
    pub const PERMISSIONS: &str = "States.Permissions";
    pub const BRANCH_FAILED: &str = "States.BranchFailed";
    pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
    pub const QUERY_EVALUATION_ERROR: &str = "States.QueryEvaluationError";
    pub const EXCEEDS_TOLERATED_FAILURE_THRESHOLD: &str =
        "States.ExceedsToleratedFailureThreshold";
}

/// The query language a state machine (or a single state) evaluates its
/// expressions in. Resolved once per state and threaded read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryLanguage {
    #[default]
    #[serde(rename = "JSONPath")]
    JsonPath,
    #[serde(rename = "JSONata")]
    Jsonata,
}

/// Canonical failure representation: matched by Retry/Catch and emitted as
/// the terminal output of an unhandled failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutput {
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Cause", default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorOutput {
    pub fn new(error: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            error: error.into(),
            cause,
        }
    }

    pub fn with_cause(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(error, Some(cause.into()))
    }

    /// The JSON shape handed to a Catcher's output pipeline.
    pub fn to_value(&self) -> Value {
        // ErrorOutput serializes to a two-field object; this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Keeps an explicitly-null field distinct from an absent one: absent stays
/// `None` via `#[serde(default)]`, `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Declarative retry policy entry. Scanned in order; first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrier {
    #[serde(rename = "ErrorEquals")]
    pub error_equals: Vec<String>,
    #[serde(
        rename = "IntervalSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interval_seconds: Option<f64>,
    #[serde(rename = "MaxAttempts", default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(rename = "BackoffRate", default, skip_serializing_if = "Option::is_none")]
    pub backoff_rate: Option<f64>,
    #[serde(
        rename = "MaxDelaySeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay_seconds: Option<f64>,
    #[serde(
        rename = "JitterStrategy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub jitter_strategy: Option<JitterStrategy>,
}

impl Retrier {
    pub fn interval(&self) -> f64 {
        self.interval_seconds.unwrap_or(1.0)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn backoff(&self) -> f64 {
        self.backoff_rate.unwrap_or(2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JitterStrategy {
    #[serde(rename = "FULL")]
    Full,
    #[serde(rename = "NONE")]
    None,
}

/// Declarative error-to-state routing entry. On match, execution resumes at
/// `next` with the Catcher substituted as the output-shaping source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catcher {
    #[serde(rename = "ErrorEquals")]
    pub error_equals: Vec<String>,
    #[serde(rename = "Next")]
    pub next: String,
    #[serde(
        rename = "ResultPath",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    #[serde(rename = "Assign", default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<serde_json::Map<String, Value>>,
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The optional field set shared by every state kind: input/output shaping,
/// error handling, and the transition target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonFields {
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(
        rename = "QueryLanguage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub query_language: Option<QueryLanguage>,
    #[serde(
        rename = "InputPath",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_path: Option<Option<String>>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(rename = "Arguments", default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(rename = "Assign", default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<serde_json::Map<String, Value>>,
    #[serde(
        rename = "ResultSelector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub result_selector: Option<Value>,
    #[serde(
        rename = "ResultPath",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    #[serde(
        rename = "OutputPath",
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_path: Option<Option<String>>,
    #[serde(rename = "Retry", default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,
    #[serde(rename = "Catch", default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(rename = "End", default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "Credentials", default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    #[serde(rename = "TaskTimeout", default, skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<Value>,
    #[serde(
        rename = "TaskTimeoutPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task_timeout_path: Option<String>,
    #[serde(
        rename = "HeartbeatSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_seconds: Option<Value>,
    #[serde(
        rename = "HeartbeatSecondsPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_seconds_path: Option<String>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelState {
    #[serde(rename = "Branches")]
    pub branches: Vec<StateMachine>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBatcher {
    #[serde(
        rename = "MaxItemsPerBatch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_items_per_batch: Option<Value>,
    #[serde(
        rename = "MaxItemsPerBatchPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_items_per_batch_path: Option<String>,
    #[serde(
        rename = "MaxInputBytesPerBatch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_input_bytes_per_batch: Option<Value>,
    #[serde(
        rename = "MaxInputBytesPerBatchPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_input_bytes_per_batch_path: Option<String>,
    #[serde(rename = "BatchInput", default, skip_serializing_if = "Option::is_none")]
    pub batch_input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    #[serde(rename = "ItemProcessor", alias = "Iterator")]
    pub item_processor: StateMachine,
    #[serde(rename = "Items", default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(rename = "ItemsPath", default, skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(rename = "ItemSelector", default, skip_serializing_if = "Option::is_none")]
    pub item_selector: Option<Value>,
    #[serde(rename = "ItemBatcher", default, skip_serializing_if = "Option::is_none")]
    pub item_batcher: Option<ItemBatcher>,
    #[serde(
        rename = "MaxConcurrency",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrency: Option<Value>,
    #[serde(
        rename = "MaxConcurrencyPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrency_path: Option<String>,
    #[serde(
        rename = "ToleratedFailureCount",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tolerated_failure_count: Option<Value>,
    #[serde(
        rename = "ToleratedFailureCountPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tolerated_failure_count_path: Option<String>,
    #[serde(
        rename = "ToleratedFailurePercentage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tolerated_failure_percentage: Option<Value>,
    #[serde(
        rename = "ToleratedFailurePercentagePath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tolerated_failure_percentage_path: Option<String>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    #[serde(rename = "Seconds", default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<Value>,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(rename = "SecondsPath", default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    #[serde(
        rename = "TimestampPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_path: Option<String>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassState {
    #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    #[serde(rename = "Choices")]
    pub choices: Vec<ChoiceRule>,
    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceedState {
    #[serde(flatten)]
    pub common: CommonFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailState {
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(rename = "ErrorPath", default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    #[serde(rename = "Cause", default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
    #[serde(rename = "CausePath", default, skip_serializing_if = "Option::is_none")]
    pub cause_path: Option<String>,
    #[serde(flatten)]
    pub common: CommonFields,
}

/// One branching rule of a Choice state. The JSONata form carries
/// `Condition`; the JSONPath form carries `Variable` plus exactly one
/// comparison operator, or one of the `And`/`Or`/`Not` combinators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(rename = "Variable", default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(rename = "StringEquals", default, skip_serializing_if = "Option::is_none")]
    pub string_equals: Option<String>,
    #[serde(
        rename = "StringLessThan",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub string_less_than: Option<String>,
    #[serde(
        rename = "StringGreaterThan",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub string_greater_than: Option<String>,
    #[serde(
        rename = "StringLessThanEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub string_less_than_equals: Option<String>,
    #[serde(
        rename = "StringGreaterThanEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub string_greater_than_equals: Option<String>,
    #[serde(
        rename = "NumericEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_equals: Option<f64>,
    #[serde(
        rename = "NumericLessThan",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_less_than: Option<f64>,
    #[serde(
        rename = "NumericGreaterThan",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_greater_than: Option<f64>,
    #[serde(
        rename = "NumericLessThanEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_less_than_equals: Option<f64>,
    #[serde(
        rename = "NumericGreaterThanEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_greater_than_equals: Option<f64>,
    #[serde(
        rename = "BooleanEquals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub boolean_equals: Option<bool>,
    #[serde(rename = "IsPresent", default, skip_serializing_if = "Option::is_none")]
    pub is_present: Option<bool>,
    #[serde(rename = "IsNull", default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(rename = "And", default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<ChoiceRule>,
    #[serde(rename = "Or", default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<ChoiceRule>,
    #[serde(rename = "Not", default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ChoiceRule>>,
}

/// A single state, discriminated by its `Type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    Task(TaskState),
    Parallel(ParallelState),
    Map(MapState),
    Wait(WaitState),
    Pass(PassState),
    Choice(ChoiceState),
    Succeed(SucceedState),
    Fail(FailState),
}

impl State {
    pub fn common(&self) -> &CommonFields {
        match self {
            Self::Task(s) => &s.common,
            Self::Parallel(s) => &s.common,
            Self::Map(s) => &s.common,
            Self::Wait(s) => &s.common,
            Self::Pass(s) => &s.common,
            Self::Choice(s) => &s.common,
            Self::Succeed(s) => &s.common,
            Self::Fail(s) => &s.common,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "Task",
            Self::Parallel(_) => "Parallel",
            Self::Map(_) => "Map",
            Self::Wait(_) => "Wait",
            Self::Pass(_) => "Pass",
            Self::Choice(_) => "Choice",
            Self::Succeed(_) => "Succeed",
            Self::Fail(_) => "Fail",
        }
    }

    /// Succeed and Fail terminate without Next/End; Choice transitions
    /// through its rules instead of Next/End.
    pub fn is_terminal_kind(&self) -> bool {
        matches!(self, Self::Succeed(_) | Self::Fail(_))
    }
}

/// An immutable workflow definition. Parsed once from its JSON document and
/// shared freely across concurrent invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    #[serde(rename = "StartAt")]
    pub start_at: String,
    #[serde(rename = "States")]
    pub states: HashMap<String, State>,
    #[serde(
        rename = "QueryLanguage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub query_language: Option<QueryLanguage>,
    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl StateMachine {
    pub fn from_json(document: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }
}
