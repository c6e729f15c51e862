//! Attempt lifecycle glue on the worker
//!
//! Runs an accepted attempt to its end, reports the outcome to the
//! scheduler, and applies the commit/discard instruction from the reply.
//! The reporting seam is a trait so the same flow drives both the HTTP
//! deployment and in-process tests.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::client::SchedulerClient;
use crate::error::Result;
use crate::protocol::{
    AttemptStats, ExecuteMapRequest, ExecuteReduceRequest, TaskCompletedRequest,
    TaskCompletedResponse,
};
use crate::scheduler::task::{AttemptId, AttemptOutcome};
use crate::scheduler::worker_registry::WorkerId;
use crate::worker::executor::{Artefact, TaskError, TaskExecutor, TaskOutput};
use tokio_util::sync::CancellationToken;

/// Where completion reports go
#[async_trait]
pub trait CompletionReporter: Send + Sync {
    async fn task_completed(&self, request: &TaskCompletedRequest) -> Result<TaskCompletedResponse>;
}

#[async_trait]
impl CompletionReporter for SchedulerClient {
    async fn task_completed(&self, request: &TaskCompletedRequest) -> Result<TaskCompletedResponse> {
        SchedulerClient::task_completed(self, request).await
    }
}

/// Run one map attempt end-to-end and settle its output
pub async fn execute_map_attempt(
    executor: Arc<TaskExecutor>,
    reporter: Arc<dyn CompletionReporter>,
    worker_id: WorkerId,
    request: ExecuteMapRequest,
    token: CancellationToken,
) {
    let result = executor.run_map(&request, &token).await;
    settle(executor, reporter, worker_id, request.attempt_id, result).await;
}

/// Run one reduce attempt end-to-end and settle its output
pub async fn execute_reduce_attempt(
    executor: Arc<TaskExecutor>,
    reporter: Arc<dyn CompletionReporter>,
    worker_id: WorkerId,
    request: ExecuteReduceRequest,
    token: CancellationToken,
) {
    let result = executor.run_reduce(&request, &token).await;
    settle(executor, reporter, worker_id, request.attempt_id, result).await;
}

/// Report the attempt and apply the scheduler's decision to its artefacts
async fn settle(
    executor: Arc<TaskExecutor>,
    reporter: Arc<dyn CompletionReporter>,
    worker_id: WorkerId,
    attempt_id: AttemptId,
    result: std::result::Result<TaskOutput, TaskError>,
) {
    let (outcome, stats, artefacts, error_message): (
        AttemptOutcome,
        AttemptStats,
        Vec<Artefact>,
        Option<String>,
    ) = match result {
        Ok(output) => (
            AttemptOutcome::Success,
            output.stats,
            output.artefacts,
            None,
        ),
        Err(TaskError::Cancelled) => (
            AttemptOutcome::Cancelled,
            AttemptStats::default(),
            Vec::new(),
            None,
        ),
        Err(e) => (
            AttemptOutcome::Error,
            AttemptStats::default(),
            Vec::new(),
            Some(e.to_string()),
        ),
    };

    let request = TaskCompletedRequest {
        worker_id,
        attempt_id,
        outcome,
        stats,
        error_message,
    };

    match reporter.task_completed(&request).await {
        Ok(response) => {
            if let Err(e) = executor.apply_action(response.action, &artefacts).await {
                warn!(
                    "Failed to apply completion action: attempt={}, error={}",
                    attempt_id, e
                );
            }
        }
        Err(e) => {
            // The scheduler will learn of the attempt through heartbeats or
            // its sweeper; never leave unclaimed temporaries behind
            warn!(
                "Failed to report completion: attempt={}, error={}",
                attempt_id, e
            );
            executor.delete_artefacts(&artefacts).await;
        }
    }

    executor.finish(attempt_id).await;
}
