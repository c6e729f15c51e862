//! Task and attempt types
//!
//! A task is the unit of scheduling; an attempt is one dispatch of a task to
//! a worker. Speculative execution means a task can carry two live attempts
//! at once, but only one ever commits.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::scheduler::job::JobId;
use crate::scheduler::worker_registry::WorkerId;

/// Unique attempt identifier
pub type AttemptId = Uuid;

/// The two task kinds of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
        }
    }
}

/// Task identity: job, kind and index within the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub job_id: JobId,

    pub kind: TaskKind,

    /// In `[0, M)` for maps, `[0, R)` for reduces
    pub index: u32,
}

impl TaskId {
    pub fn new(job_id: JobId, kind: TaskKind, index: u32) -> Self {
        Self { job_id, kind, index }
    }

    /// Short label without the job id, used in per-job sequences
    pub fn label(&self) -> String {
        format!("{}-{}", self.kind, self.index)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.job_id, self.kind, self.index)
    }
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the ready queue
    Pending,

    /// At least one attempt is in flight
    Running,

    /// Exactly one attempt committed; no further dispatches
    Committed,

    /// Attempts exhausted or the job failed around it
    Failed,
}

impl TaskState {
    /// Check if the state is terminal (won't change)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Committed | TaskState::Failed)
    }
}

/// Outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Dispatched, not yet reported
    InFlight,

    /// Reported success; at most one per task keeps this outcome
    Success,

    /// User code or blob store failure on the worker
    Error,

    /// Cancelled cooperatively (or recorded redundant after a lost race)
    Cancelled,

    /// Worker died, was forgotten, or the deadline passed
    TimedOut,
}

impl AttemptOutcome {
    /// Check if the outcome is terminal (won't change)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptOutcome::InFlight)
    }
}

/// One dispatch of a task to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Unique attempt ID
    pub id: AttemptId,

    /// Worker the attempt was dispatched to
    pub worker_id: WorkerId,

    /// Dispatch timestamp (unix millis)
    pub started_at: i64,

    /// Completion timestamp (unix millis)
    pub finished_at: Option<i64>,

    /// Current outcome
    pub outcome: AttemptOutcome,

    /// Launched speculatively by the straggler monitor
    pub is_backup: bool,

    /// Reported Success after another attempt had already committed
    pub redundant: bool,

    /// When the scheduler asked this attempt to die (unix millis)
    pub cancel_requested_at: Option<i64>,
}

impl Attempt {
    /// Create a new in-flight attempt
    pub fn new(worker_id: WorkerId, is_backup: bool, now_ms: i64) -> Self {
        Self {
            id: AttemptId::new_v4(),
            worker_id,
            started_at: now_ms,
            finished_at: None,
            outcome: AttemptOutcome::InFlight,
            is_backup,
            redundant: false,
            cancel_requested_at: None,
        }
    }

    /// Time since dispatch
    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        (now_ms - self.started_at).max(0) as u64
    }

    /// Wall-clock duration, once finished
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).max(0) as u64)
    }

    /// Terminate the attempt with an outcome; first terminal outcome sticks
    pub fn finish(&mut self, outcome: AttemptOutcome, now_ms: i64) {
        if self.outcome.is_terminal() {
            return;
        }
        self.outcome = outcome;
        self.finished_at = Some(now_ms);
    }
}

/// Task definition and its attempt history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identity
    pub id: TaskId,

    /// Current state
    pub state: TaskState,

    /// Every dispatch of this task, in order
    pub attempts: Vec<Attempt>,

    /// First input line of the split (maps only; inclusive)
    pub split_start: u64,

    /// One past the last input line of the split (maps only)
    pub split_end: u64,

    /// The single attempt whose output is canonical
    pub committing_attempt: Option<AttemptId>,
}

impl Task {
    /// Create a pending map task over a line range
    pub fn new_map(job_id: JobId, index: u32, split: (u64, u64)) -> Self {
        Self {
            id: TaskId::new(job_id, TaskKind::Map, index),
            state: TaskState::Pending,
            attempts: Vec::new(),
            split_start: split.0,
            split_end: split.1,
            committing_attempt: None,
        }
    }

    /// Create a pending reduce task
    pub fn new_reduce(job_id: JobId, index: u32) -> Self {
        Self {
            id: TaskId::new(job_id, TaskKind::Reduce, index),
            state: TaskState::Pending,
            attempts: Vec::new(),
            split_start: 0,
            split_end: 0,
            committing_attempt: None,
        }
    }

    /// Attempts currently in flight
    pub fn in_flight(&self) -> impl Iterator<Item = &Attempt> {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::InFlight)
    }

    /// Number of attempts currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().count()
    }

    /// Whether a speculative attempt is already running
    pub fn has_backup_in_flight(&self) -> bool {
        self.in_flight().any(|a| a.is_backup)
    }

    /// Look up an attempt by id
    pub fn attempt(&self, attempt_id: AttemptId) -> Option<&Attempt> {
        self.attempts.iter().find(|a| a.id == attempt_id)
    }

    /// Look up an attempt mutably by id
    pub fn attempt_mut(&mut self, attempt_id: AttemptId) -> Option<&mut Attempt> {
        self.attempts.iter_mut().find(|a| a.id == attempt_id)
    }

    /// Dispatches so far; compared against `max_attempts` before requeueing
    pub fn dispatch_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Record a new dispatch, moving the task to Running
    pub fn begin_attempt(&mut self, worker_id: WorkerId, is_backup: bool, now_ms: i64) -> AttemptId {
        let attempt = Attempt::new(worker_id, is_backup, now_ms);
        let attempt_id = attempt.id;
        self.attempts.push(attempt);
        self.state = TaskState::Running;
        attempt_id
    }

    /// Commit one attempt; the task accepts no further dispatches
    pub fn mark_committed(&mut self, attempt_id: AttemptId, now_ms: i64) {
        if let Some(attempt) = self.attempt_mut(attempt_id) {
            attempt.finish(AttemptOutcome::Success, now_ms);
        }
        self.committing_attempt = Some(attempt_id);
        self.state = TaskState::Committed;
    }
}
