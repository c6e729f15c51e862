//! Worker-side task surface: accept, execute and cancel attempts
//!
//! Acceptance claims a slot synchronously, so a busy worker answers 409 and
//! the scheduler retries the attempt elsewhere. Execution itself runs in a
//! spawned task that reports back to the scheduler and then applies the
//! commit decision from the reply.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use gridmr_core::protocol::{CancelTaskRequest, ErrorResponse, ExecuteMapRequest, ExecuteReduceRequest};
use gridmr_core::worker::{execute_map_attempt, execute_reduce_attempt};

use crate::routes::error_reply;
use crate::state::WorkerAppState;

/// Accept a map attempt
pub async fn execute_map(
    State(state): State<WorkerAppState>,
    Json(request): Json<ExecuteMapRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let token = state
        .executor
        .try_begin(request.attempt_id)
        .await
        .map_err(error_reply)?;

    let worker_id = *state.worker_id.read().await;
    tokio::spawn(execute_map_attempt(
        state.executor.clone(),
        state.client.clone(),
        worker_id,
        request,
        token,
    ));

    Ok(StatusCode::ACCEPTED)
}

/// Accept a reduce attempt
pub async fn execute_reduce(
    State(state): State<WorkerAppState>,
    Json(request): Json<ExecuteReduceRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let token = state
        .executor
        .try_begin(request.attempt_id)
        .await
        .map_err(error_reply)?;

    let worker_id = *state.worker_id.read().await;
    tokio::spawn(execute_reduce_attempt(
        state.executor.clone(),
        state.client.clone(),
        worker_id,
        request,
        token,
    ));

    Ok(StatusCode::ACCEPTED)
}

/// Cancel an attempt; idempotent, unknown attempts are a no-op
pub async fn cancel(
    State(state): State<WorkerAppState>,
    Json(request): Json<CancelTaskRequest>,
) -> StatusCode {
    state.executor.cancel(request.attempt_id).await;
    StatusCode::OK
}
