//! Worker-facing scheduler routes: registration, heartbeats, completions

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use gridmr_core::protocol::{
    ErrorResponse, HeartbeatRequest, HeartbeatResponse, RegisterWorkerRequest,
    RegisterWorkerResponse, TaskCompletedRequest, TaskCompletedResponse,
};

use crate::routes::error_reply;
use crate::state::SchedulerAppState;

/// Register a worker
pub async fn register(
    State(state): State<SchedulerAppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> Json<RegisterWorkerResponse> {
    let worker_id = state.scheduler.register_worker(request).await;
    Json(RegisterWorkerResponse { worker_id })
}

/// Reconcile a worker heartbeat
pub async fn heartbeat(
    State(state): State<SchedulerAppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.scheduler.heartbeat(request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(error_reply(e)),
    }
}

/// Record an attempt completion; the reply carries the commit decision
pub async fn task_completed(
    State(state): State<SchedulerAppState>,
    Json(request): Json<TaskCompletedRequest>,
) -> Json<TaskCompletedResponse> {
    Json(state.scheduler.task_completed(request).await)
}
