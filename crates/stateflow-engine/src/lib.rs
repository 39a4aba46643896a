//! Async interpreter for Stateflow state machines.
//!
//! The [`Interpreter`] walks a parsed
//! [`StateMachine`](stateflow_core::StateMachine) from `StartAt`, executing
//! each state kind through its own strategy, routing failures through
//! declared Retry/Catch policies, and shaping every result through the
//! language-gated output pipeline. External work units, clocks, and waits
//! are injected through [`RunOptions`](stateflow_core::RunOptions); the
//! engine itself never sleeps and never touches the network.

mod concurrency;
mod driver;
mod expr;
mod output;
mod retry;
mod states;
mod timeouts;

pub use driver::Interpreter;
pub use expr::DefaultEvaluator;
