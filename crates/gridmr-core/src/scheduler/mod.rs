//! Job scheduling core
//!
//! A single scheduler process owns all job, task and worker state and drives
//! jobs through their phases:
//!
//! - Submissions are decomposed into M map tasks over input line ranges and
//!   R reduce tasks; reduce tasks become dispatchable only once every map
//!   has committed.
//! - A dispatch loop pushes attempts to idle workers, serving per-job FIFO
//!   queues round-robin across jobs so late submissions are not starved.
//! - Workers heartbeat their in-flight attempt sets; a sweeper degrades
//!   silent workers to Suspect and then Dead, requeueing whatever they held.
//! - A straggler monitor compares in-flight attempts against the median
//!   committed duration of the phase and launches speculative backups on
//!   distinct workers.
//! - A commit protocol serialises completions per task: the first Success
//!   wins and renames its temporary output to the canonical path, later
//!   successes are recorded redundant and discarded.
//!
//! All state lives in [`state::SchedulerState`] behind one coarse lock held
//! by [`dispatch::Scheduler`]; I/O stays outside the lock.

pub mod dispatch;
pub mod job;
pub mod liveness;
pub mod state;
pub mod straggler;
pub mod task;
pub mod worker_registry;

// Re-export main types
pub use dispatch::{Scheduler, TaskTransport};
pub use job::{Job, JobId, JobPhase, JobSpec};
pub use state::{Assignment, CancelDirective, CompletionOutcome, SchedulerState};
pub use task::{Attempt, AttemptId, AttemptOutcome, Task, TaskId, TaskKind, TaskState};
pub use worker_registry::{Liveness, WorkerEntry, WorkerId};
