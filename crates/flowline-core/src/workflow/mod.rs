//! Workflow engine core: planning, dispatch, and recovery.
//!
//! - `definition` -- YAML/JSON parsing, structural validation, content hashing
//! - `dag` -- batch-wise topological planner with cycle detection
//! - `readiness` -- AND / OR-group readiness predicate over incoming edges
//! - `context` -- per-run state: outputs, variables, retry counters, attempt history
//! - `expression` -- JEXL evaluator for transforms and conditions
//! - `step` -- the `StepExecutor` capability and error classification
//! - `registry` -- type tag to executor constructor map
//! - `handlers` -- built-in step executors
//! - `retry` -- retry policy, backoff, and the retry coordinator
//! - `scheduler` -- batch scheduler with a full barrier between batches
//! - `engine` -- pre-flight, plan cache, run orchestration, cancellation

pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod handlers;
pub mod readiness;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod step;
