use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::traits::QueryEvaluator;
use crate::types::{error_names, ErrorOutput, QueryLanguage};

/// A failure raised by an injected resource. Becomes the state's
/// `ErrorOutput` verbatim.
#[derive(Debug, Clone)]
pub struct ResourceError {
    pub error: String,
    pub cause: Option<String>,
}

impl ResourceError {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: Some(cause.into()),
        }
    }

    /// A generic task failure (`States.TaskFailed`) with the given cause.
    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(error_names::TASK_FAILED, cause)
    }
}

impl From<ResourceError> for ErrorOutput {
    fn from(e: ResourceError) -> Self {
        ErrorOutput::new(e.error, e.cause)
    }
}

/// A callable work unit a Task state's `Resource` resolves to. Returning
/// `Ok(None)` means "no output": the state's effective input is reused.
pub type ResourceFn = Arc<
    dyn Fn(Value) -> BoxFuture<'static, Result<Option<Value>, ResourceError>> + Send + Sync,
>;

/// Dynamic fallback for resources not present in the static table.
pub type ResourceResolver = Arc<dyn Fn(&str) -> Option<ResourceFn> + Send + Sync>;

pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Receives the absolute deadline a Wait state resolved to, and the wait
/// seconds when they are known (path/literal `Seconds` forms).
pub type WaitFn = Arc<dyn Fn(DateTime<Utc>, Option<f64>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Receives the computed backoff before a state is re-attempted. The engine
/// never sleeps on its own; pacing belongs to the caller.
pub type RetryFn = Arc<dyn Fn(RetryAdvice) -> BoxFuture<'static, ()> + Send + Sync>;

pub type StateCompleteFn = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Vets a Task state's evaluated `Credentials`; `false` short-circuits the
/// call with `States.Permissions`.
pub type CredentialsFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Offered the resolved heartbeat seconds; `false` fails the task
/// immediately with `States.HeartbeatTimeout`.
pub type HeartbeatFn = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// Vets a Map ItemBatcher's resolved `MaxInputBytesPerBatch`.
pub type BatchBytesFn = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Everything the Retry/Catch engine knows about an upcoming re-attempt.
#[derive(Debug, Clone)]
pub struct RetryAdvice {
    /// State (or `Parallel[i]` branch label) being re-attempted.
    pub state_name: String,
    pub error: ErrorOutput,
    /// 1-based attempt number of the upcoming re-execution.
    pub attempt: u32,
    /// Backoff computed from IntervalSeconds/BackoffRate/JitterStrategy.
    pub delay_seconds: f64,
}

/// Per-run configuration: initial context, language override, resource
/// lookup, and the optional hooks. Constructed once at the top of a run and
/// passed by reference through the context chain.
///
/// Hook defaults: observers (`on_retry`, `on_state_complete`, `on_wait`)
/// are no-ops when absent; `on_credentials` accepts; `on_heartbeat_seconds`
/// refuses, since the engine has no heartbeat channel of its own;
/// `on_max_input_bytes_per_batch` accepts; `now_provider` is `Utc::now`.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Auxiliary JSON exposed to expressions (`$$` / `$states.context`).
    pub context_object: Option<Value>,
    /// Overrides the state machine's own `QueryLanguage`.
    pub language: Option<QueryLanguage>,
    pub resources: HashMap<String, ResourceFn>,
    pub resource_resolver: Option<ResourceResolver>,
    pub now_provider: Option<NowFn>,
    pub on_wait: Option<WaitFn>,
    pub on_retry: Option<RetryFn>,
    pub on_state_complete: Option<StateCompleteFn>,
    pub on_credentials: Option<CredentialsFn>,
    pub on_heartbeat_seconds: Option<HeartbeatFn>,
    pub on_max_input_bytes_per_batch: Option<BatchBytesFn>,
    /// Replaces the built-in expression adapters.
    pub evaluator: Option<Arc<dyn QueryEvaluator>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, uri: impl Into<String>, f: ResourceFn) -> Self {
        self.resources.insert(uri.into(), f);
        self
    }

    pub fn with_context_object(mut self, context: Value) -> Self {
        self.context_object = Some(context);
        self
    }

    pub fn with_language(mut self, language: QueryLanguage) -> Self {
        self.language = Some(language);
        self
    }

    /// Static table first, resolver fallback second.
    pub fn resource_for(&self, uri: &str) -> Option<ResourceFn> {
        if let Some(f) = self.resources.get(uri) {
            return Some(f.clone());
        }
        self.resource_resolver.as_ref().and_then(|r| r(uri))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match &self.now_provider {
            Some(f) => f(),
            None => Utc::now(),
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("context_object", &self.context_object)
            .field("language", &self.language)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("resource_resolver", &self.resource_resolver.is_some())
            .field("now_provider", &self.now_provider.is_some())
            .field("on_wait", &self.on_wait.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("on_state_complete", &self.on_state_complete.is_some())
            .field("on_credentials", &self.on_credentials.is_some())
            .field("on_heartbeat_seconds", &self.on_heartbeat_seconds.is_some())
            .field(
                "on_max_input_bytes_per_batch",
                &self.on_max_input_bytes_per_batch.is_some(),
            )
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}
