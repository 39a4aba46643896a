//! Core types for the Stateflow workflow engine: the state machine
//! document model, the error hierarchy, run options and hooks, and the
//! query-evaluator trait the interpreter dispatches expressions through.

pub mod error;
pub mod options;
pub mod traits;
pub mod types;
pub mod validate;

pub use error::{EngineError, Result};
pub use options::{ResourceError, ResourceFn, RetryAdvice, RunOptions};
pub use traits::QueryEvaluator;
pub use types::{ErrorOutput, QueryLanguage, State, StateMachine};
