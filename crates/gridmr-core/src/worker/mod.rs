//! Worker execution side
//!
//! A worker offers a fixed number of task slots, executes map and reduce
//! attempts against the shared blob store, and reports completions back to
//! the scheduler. Outputs stay under unique temporary paths until the
//! scheduler's commit decision arrives; cancellation is cooperative through
//! per-attempt tokens.

pub mod codec;
pub mod executor;
pub mod heartbeat;
pub mod runtime;
pub mod udf;

// Re-export main types
pub use executor::{Artefact, TaskError, TaskExecutor, TaskOutput};
pub use heartbeat::run_heartbeat_loop;
pub use runtime::{execute_map_attempt, execute_reduce_attempt, CompletionReporter};
pub use udf::{Mapper, Reducer, UdfRegistry};
