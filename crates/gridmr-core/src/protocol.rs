//! Wire types shared by the scheduler, workers and the CLI
//!
//! Every RPC exchanged in the system is a JSON body described here, so the
//! three crates agree on one schema without duplicating request structs per
//! route handler.

use serde::{Deserialize, Serialize};

use crate::scheduler::job::{JobId, JobPhase};
use crate::scheduler::task::{AttemptId, AttemptOutcome};
use crate::scheduler::worker_registry::WorkerId;

/// Job submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Store path of the input blob
    pub input_path: String,

    /// Store directory for the final reduce outputs
    pub output_path: String,

    /// Mapper code reference, resolvable by a worker
    pub mapper_ref: String,

    /// Reducer code reference, resolvable by a worker
    pub reducer_ref: String,

    /// Number of map tasks (M)
    pub num_maps: u32,

    /// Number of reduce partitions (R)
    pub num_reduces: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// Per-kind task state counts reported in a status snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: u32,
    pub running: u32,
    pub committed: u32,
}

/// Job status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,

    pub phase: JobPhase,

    pub num_maps: u32,

    pub num_reduces: u32,

    pub map_tasks: TaskCounts,

    pub reduce_tasks: TaskCounts,

    /// Attempts that finished with Error, Cancelled or TimedOut
    pub failed_attempts: u32,

    /// First error that drove the job towards Failed, if any
    pub error_message: Option<String>,

    /// Task ids in commit order, monotone per job
    pub completion_sequence: Vec<String>,
}

/// Worker registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    /// Base URL the scheduler dispatches tasks to
    pub endpoint: String,

    /// Concurrent task slots
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: WorkerId,
}

/// Periodic worker heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: WorkerId,

    /// Attempts the worker believes it is still running
    pub in_flight: Vec<AttemptId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Attempts the worker must kill: the scheduler has already committed
    /// another attempt or forgotten these
    pub cancellations: Vec<AttemptId>,
}

/// Byte/record counters reported with a completed attempt
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AttemptStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub records_out: u64,
}

/// Worker -> scheduler completion report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletedRequest {
    pub worker_id: WorkerId,

    pub attempt_id: AttemptId,

    pub outcome: AttemptOutcome,

    #[serde(default)]
    pub stats: AttemptStats,

    /// Populated for Error outcomes
    #[serde(default)]
    pub error_message: Option<String>,
}

/// What the reporting worker must do with its temporary output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    /// This attempt committed: rename every tmp artefact to its canonical path
    Commit,

    /// Another attempt committed (or the task is gone): delete tmp artefacts
    Discard,

    /// Nothing to do; the attempt produced no committable output
    Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletedResponse {
    pub action: CompletionAction,
}

/// Scheduler -> worker map dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteMapRequest {
    pub job_id: JobId,

    /// Map index in [0, M)
    pub task_index: u32,

    pub attempt_id: AttemptId,

    pub input_path: String,

    /// First input line of the split (inclusive)
    pub split_start: u64,

    /// One past the last input line of the split
    pub split_end: u64,

    pub mapper_ref: String,

    pub num_reduces: u32,
}

/// Scheduler -> worker reduce dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReduceRequest {
    pub job_id: JobId,

    /// Reduce partition in [0, R)
    pub task_index: u32,

    pub attempt_id: AttemptId,

    pub num_maps: u32,

    pub reducer_ref: String,

    pub output_path: String,
}

/// Cooperative cancellation request; idempotent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    pub attempt_id: AttemptId,
}

/// Blob upload; payload is base64 so it travels as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBlobRequest {
    pub remote_path: String,

    pub data_base64: String,
}

/// Lines read back from a committed output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub lines: Vec<String>,
}

/// Error body returned by every HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    pub category: String,
}
